pub mod extractor;
pub mod google;
pub mod jwt;
pub mod password;
pub mod secrets;

pub use extractor::{AuthUser, MaybeAuthUser};
