// Integration tests for person event handling
//
// Covers the decision between provisioning, resuming, re-enabling, renaming, disabling and
// deleting, and the email events announced for each.

mod common;

use common::{active_identity, Harness, DOMAIN, EMAIL_CATEGORY};
use email_identity_service::error::EmailError;
use email_identity_service::models::{
    EmailAddressStatus, EmailIdentity, PersonSnapshot, RoleAssignment,
};
use email_identity_service::services::EmailAction;
use event_schema::EmailLifecycleEvent;
use std::sync::atomic::Ordering;
use uuid::Uuid;

fn generated_addresses(h: &Harness) -> Vec<String> {
    h.publisher
        .published()
        .into_iter()
        .filter_map(|e| match e {
            EmailLifecycleEvent::Generated(g) => Some(g.address),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_entitled_person_gets_address_and_event() {
    let h = Harness::new(3);
    let person = h.entitled_person("Max", "Mustermann");

    let action = h.handler.handle_person_upserted(&person, &[]).await.unwrap();

    let identity = match action {
        EmailAction::Provisioned(identity) => identity,
        other => panic!("unexpected action: {other:?}"),
    };
    assert_eq!(identity.address, "max.mustermann@schule-sh.de");
    assert_eq!(identity.priority, 0);
    assert_eq!(generated_addresses(&h), vec!["max.mustermann@schule-sh.de"]);
    assert_eq!(
        h.mail.group_calls.lock().unwrap()[0].1,
        "0706054".to_string()
    );

    match &h.publisher.published()[0] {
        EmailLifecycleEvent::Generated(event) => {
            assert_eq!(event.person_id, person.person_id);
            assert_eq!(event.email_identity_id, identity.id);
            assert_eq!(event.domain, DOMAIN);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_redelivery_is_a_noop() {
    let h = Harness::new(3);
    let person = h.entitled_person("Max", "Mustermann");

    h.handler.handle_person_upserted(&person, &[]).await.unwrap();
    let action = h.handler.handle_person_upserted(&person, &[]).await.unwrap();

    assert!(matches!(action, EmailAction::AlreadyActive(_)));
    assert_eq!(h.mail.create_calls(), 1);
    assert_eq!(h.publisher.published().len(), 1);
}

#[tokio::test]
async fn test_active_suffixed_address_still_matches() {
    let h = Harness::new(3);
    let person = h.entitled_person("Max", "Mustermann");
    active_identity(&h.store, person.person_id, "max.mustermann2@schule-sh.de", 0);

    let action = h.handler.handle_person_upserted(&person, &[]).await.unwrap();

    assert!(matches!(action, EmailAction::AlreadyActive(_)));
    assert_eq!(h.mail.create_calls(), 0);
}

#[tokio::test]
async fn test_lost_entitlement_disables_and_announces_once() {
    let h = Harness::new(3);
    let person = PersonSnapshot {
        person_id: Uuid::new_v4(),
        first_name: "Max".to_string(),
        last_name: "Mustermann".to_string(),
        username: Some("mmustermann".to_string()),
        role_assignments: vec![RoleAssignment {
            role_id: Uuid::new_v4(),
            organisation_id: Uuid::new_v4(),
            organisation_code: None,
        }],
    };
    let first = active_identity(&h.store, person.person_id, "max.mustermann@schule-sh.de", 0);
    let second = active_identity(&h.store, person.person_id, "max.mustermann1@schule-sh.de", 1);

    let action = h.handler.handle_person_upserted(&person, &[]).await.unwrap();

    match action {
        EmailAction::Disabled(outcome) => {
            assert_eq!(outcome.disabled, 2);
            assert!(outcome.event_published);
        }
        other => panic!("unexpected action: {other:?}"),
    }
    assert_eq!(h.store.current(first.id), Some(EmailAddressStatus::Disabled));
    assert_eq!(h.store.current(second.id), Some(EmailAddressStatus::Disabled));

    let events = h.publisher.published();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], EmailLifecycleEvent::Disabled(_)));
}

#[tokio::test]
async fn test_removed_assignment_does_not_keep_entitlement() {
    let h = Harness::new(3);
    let person = h.entitled_person("Max", "Mustermann");
    let identity = active_identity(&h.store, person.person_id, "max.mustermann@schule-sh.de", 0);
    let removed = person.role_assignments.clone();

    let action = h
        .handler
        .handle_person_upserted(&person, &removed)
        .await
        .unwrap();

    assert!(matches!(action, EmailAction::Disabled(_)));
    assert_eq!(
        h.store.current(identity.id),
        Some(EmailAddressStatus::Disabled)
    );
}

#[tokio::test]
async fn test_regained_entitlement_reenables_matching_address() {
    let h = Harness::new(3);
    let person = h.entitled_person("Max", "Mustermann");
    let identity = active_identity(&h.store, person.person_id, "max.mustermann@schule-sh.de", 0);
    h.store.set_status(identity.id, EmailAddressStatus::Disabled);

    let action = h.handler.handle_person_upserted(&person, &[]).await.unwrap();

    assert_eq!(action, EmailAction::Reenabled(identity.clone()));
    assert_eq!(h.store.current(identity.id), Some(EmailAddressStatus::Active));
    assert_eq!(h.mail.create_calls(), 0);
    assert_eq!(generated_addresses(&h), vec!["max.mustermann@schule-sh.de"]);
}

#[tokio::test]
async fn test_pending_identity_is_resumed() {
    let h = Harness::new(3);
    let person = h.entitled_person("Max", "Mustermann");
    let mut identity = EmailIdentity::new(
        person.person_id,
        "max.mustermann@schule-sh.de".to_string(),
        DOMAIN.to_string(),
        0,
    );
    identity.mail_account_ref = Some("ox-existing".to_string());
    h.store.insert(identity.clone());
    h.store.set_status(identity.id, EmailAddressStatus::Pending);

    let action = h.handler.handle_person_upserted(&person, &[]).await.unwrap();

    match action {
        EmailAction::Resumed(resumed) => assert_eq!(resumed.id, identity.id),
        other => panic!("unexpected action: {other:?}"),
    }
    assert_eq!(h.mail.create_calls(), 0);
    assert_eq!(h.store.current(identity.id), Some(EmailAddressStatus::Active));
}

#[tokio::test]
async fn test_rename_provisions_preferred_address_and_disables_old() {
    let h = Harness::new(3);
    let mut person = h.entitled_person("Max", "Mustermann");
    let old = active_identity(&h.store, person.person_id, "max.mustermann@schule-sh.de", 0);

    person.last_name = "Meier".to_string();
    let action = h.handler.handle_person_upserted(&person, &[]).await.unwrap();

    let new = match action {
        EmailAction::Provisioned(identity) => identity,
        other => panic!("unexpected action: {other:?}"),
    };
    assert_eq!(new.address, "max.meier@schule-sh.de");
    assert_eq!(new.priority, 0);

    let old_row = h.store.get(old.id).unwrap();
    assert_eq!(old_row.priority, 1);
    assert_eq!(h.store.current(old.id), Some(EmailAddressStatus::Disabled));

    // Superseding is not a loss of entitlement
    let events = h.publisher.published();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], EmailLifecycleEvent::Generated(_)));
}

#[tokio::test]
async fn test_failed_rename_keeps_existing_priorities() {
    let h = Harness::new(3);
    let mut person = h.entitled_person("Max", "Mustermann");
    let old = active_identity(&h.store, person.person_id, "max.mustermann@schule-sh.de", 0);
    h.mail.fail_create.store(true, Ordering::SeqCst);

    person.last_name = "Meier".to_string();
    for _ in 0..2 {
        assert!(h.handler.handle_person_upserted(&person, &[]).await.is_err());
    }

    assert_eq!(h.store.get(old.id).unwrap().priority, 0);
    assert_eq!(h.store.current(old.id), Some(EmailAddressStatus::Active));
}

#[tokio::test]
async fn test_missing_domain_is_reported() {
    let h = Harness::new(3);
    let organisation_id = Uuid::new_v4();
    let role_id = Uuid::new_v4();
    h.entitlements.grant(role_id, EMAIL_CATEGORY);
    let person = PersonSnapshot {
        person_id: Uuid::new_v4(),
        first_name: "Max".to_string(),
        last_name: "Mustermann".to_string(),
        username: None,
        role_assignments: vec![RoleAssignment {
            role_id,
            organisation_id,
            organisation_code: None,
        }],
    };

    let err = h
        .handler
        .handle_person_upserted(&person, &[])
        .await
        .unwrap_err();

    match err {
        EmailError::EmailDomainNotFound(org) => assert_eq!(org, organisation_id),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.store.all().is_empty());
}

#[tokio::test]
async fn test_publish_failure_does_not_fail_provisioning() {
    let h = Harness::new(3);
    let person = h.entitled_person("Max", "Mustermann");
    h.publisher.fail.store(true, Ordering::SeqCst);

    let action = h.handler.handle_person_upserted(&person, &[]).await.unwrap();

    let identity = match action {
        EmailAction::Provisioned(identity) => identity,
        other => panic!("unexpected action: {other:?}"),
    };
    assert_eq!(h.store.current(identity.id), Some(EmailAddressStatus::Active));
}

#[tokio::test]
async fn test_person_deletion_tears_everything_down() {
    let h = Harness::new(3);
    let person = h.entitled_person("Max", "Mustermann");
    h.handler.handle_person_upserted(&person, &[]).await.unwrap();

    let action = h
        .handler
        .handle_person_deleted(person.person_id)
        .await
        .unwrap();

    match action {
        EmailAction::Deleted(outcome) => {
            assert_eq!(outcome.removed.len(), 1);
            assert!(outcome.retained.is_empty());
        }
        other => panic!("unexpected action: {other:?}"),
    }
    assert!(h.store.all().is_empty());
    assert_eq!(h.mail.deleted.lock().unwrap().len(), 1);
    assert_eq!(h.directory.deleted.lock().unwrap().len(), 1);
}
