//! Candidate address generation
//!
//! Turns a person's first/last name into a normalized `firstname.lastname` local-part and
//! finds the first free variant (`base`, `base1`, `base2`, ...) against an existence lookup.
//! Everything here is a pure function of its inputs plus the lookup's answers.

use crate::error::{EmailError, Result};
use async_trait::async_trait;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Minimum characters per name part
pub const MIN_NAME_PART_LENGTH: usize = 2;

/// Upper bound for local-part plus domain
pub const MAX_COMBINED_LENGTH: usize = 64;

/// Candidates tried by `generate_available_address` (`base`, `base1`, ... `base9`)
pub const MAX_GENERATION_ATTEMPTS: u32 = 10;

/// Existence predicate consulted during generation
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn exists_address(&self, address: &str) -> Result<bool>;
}

/// Build the canonical local-part for a name pair
pub fn generate_candidate(first_name: &str, last_name: &str) -> Result<String> {
    validate_name_part("first name", first_name)?;
    validate_name_part("last name", last_name)?;

    let first = normalize_name_part(first_name);
    let last = normalize_name_part(last_name);

    if first.is_empty() || last.is_empty() {
        return Err(EmailError::InvalidName(format!(
            "'{} {}' is empty after normalization",
            first_name, last_name
        )));
    }

    let local_part = format!("{}.{}", first, last);
    if local_part.len() > MAX_COMBINED_LENGTH {
        return Err(EmailError::InvalidName(format!(
            "local part '{}' exceeds {} characters",
            local_part, MAX_COMBINED_LENGTH
        )));
    }

    Ok(local_part)
}

/// Find the first candidate address the lookup does not know yet
pub async fn generate_available_address<L>(
    first_name: &str,
    last_name: &str,
    domain: &str,
    lookup: &L,
) -> Result<String>
where
    L: AddressLookup + ?Sized,
{
    let base = generate_candidate(first_name, last_name)?;

    for attempt in 0..MAX_GENERATION_ATTEMPTS {
        let local_part = if attempt == 0 {
            base.clone()
        } else {
            format!("{}{}", base, attempt)
        };
        ensure_combined_length(&local_part, domain)?;

        let address = format!("{}@{}", local_part, domain);
        if !lookup.exists_address(&address).await? {
            return Ok(address);
        }
    }

    Err(EmailError::AddressGenerationAttemptsExceeded(format!(
        "{}@{}",
        base, domain
    )))
}

/// True when `address` is exactly the un-suffixed canonical address for the name pair
pub fn is_equal(address: &str, first_name: &str, last_name: &str, domain: &str) -> bool {
    match generate_candidate(first_name, last_name) {
        Ok(local_part) => address.eq_ignore_ascii_case(&format!("{}@{}", local_part, domain)),
        Err(_) => false,
    }
}

/// Like `is_equal`, but also accepts a numeric suffix (`max.mustermann2@...`)
pub fn is_equal_ignore_count(
    address: &str,
    first_name: &str,
    last_name: &str,
    domain: &str,
) -> bool {
    let Ok(base) = generate_candidate(first_name, last_name) else {
        return false;
    };
    let address = address.to_ascii_lowercase();
    let Some((local_part, address_domain)) = address.rsplit_once('@') else {
        return false;
    };
    if !address_domain.eq_ignore_ascii_case(domain) {
        return false;
    }

    local_part
        .strip_prefix(base.as_str())
        .map(|suffix| suffix.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn ensure_combined_length(local_part: &str, domain: &str) -> Result<()> {
    let combined = local_part.len() + domain.len();
    if combined > MAX_COMBINED_LENGTH {
        return Err(EmailError::InvalidName(format!(
            "'{}' with domain '{}' is {} characters (max {})",
            local_part, domain, combined, MAX_COMBINED_LENGTH
        )));
    }
    Ok(())
}

fn validate_name_part(label: &str, value: &str) -> Result<()> {
    let trimmed = value.trim();
    if trimmed.nfc().count() < MIN_NAME_PART_LENGTH {
        return Err(EmailError::InvalidAttributeLength(format!(
            "{} must have at least {} characters",
            label, MIN_NAME_PART_LENGTH
        )));
    }

    if let Some(bad) = trimmed.chars().find(|c| !is_permitted_char(*c)) {
        return Err(EmailError::InvalidCharacterSet(format!(
            "{} contains unsupported character '{}'",
            label, bad
        )));
    }

    Ok(())
}

/// Latin letters (with diacritics), combining marks, and name punctuation
fn is_permitted_char(c: char) -> bool {
    if c.is_ascii_alphabetic() || is_combining_mark(c) {
        return true;
    }
    if matches!(c, ' ' | '-' | '\'' | '.' | '\u{2019}') {
        return true;
    }
    c.is_alphabetic()
        && matches!(c as u32, 0x00C0..=0x024F | 0x1E00..=0x1EFF)
}

fn substitute(c: char) -> Option<&'static str> {
    let replacement = match c {
        'ä' => "ae",
        'ö' => "oe",
        'ü' => "ue",
        'ß' => "ss",
        'æ' => "ae",
        'ø' => "oe",
        'œ' => "oe",
        'å' => "aa",
        'ð' => "d",
        'đ' => "d",
        'þ' => "th",
        'ł' => "l",
        'ŀ' => "l",
        'ı' => "i",
        'ĳ' => "ij",
        'ŋ' => "n",
        _ => return None,
    };
    Some(replacement)
}

fn normalize_name_part(value: &str) -> String {
    // composed first, so `o` + U+0308 hits the same table entry as `ö`
    let lowered = value.trim().nfc().collect::<String>().to_lowercase();

    let mut substituted = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        match substitute(c) {
            Some(replacement) => substituted.push_str(replacement),
            None => substituted.push(c),
        }
    }

    let mut cleaned = String::with_capacity(substituted.len());
    for c in substituted.nfd().filter(|c| !is_combining_mark(*c)) {
        match c {
            'a'..='z' => cleaned.push(c),
            // collapse runs, never lead with a hyphen
            '-' if !cleaned.is_empty() && !cleaned.ends_with('-') => cleaned.push('-'),
            _ => {}
        }
    }

    cleaned.trim_end_matches('-').to_string()
}
