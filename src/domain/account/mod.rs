//! Account bounded context - registration identity and state

pub mod entity;
pub mod value_object;

pub use entity::Account;
pub use value_object::RegistrationState;
