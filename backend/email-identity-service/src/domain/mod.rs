pub mod address_generator;

pub use address_generator::{
    generate_available_address, generate_candidate, is_equal, is_equal_ignore_count,
    AddressLookup,
};
