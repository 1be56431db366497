pub mod collaborators;

pub use collaborators::{BalancePersistence, ContentStore, NotificationSender, SecretPersistence};
