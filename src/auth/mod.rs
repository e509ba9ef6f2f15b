pub mod cert;
mod resolver;
mod token;

pub use resolver::{IdentityResolver, basic_username};
pub use token::{TokenService, UNAUTHENTICATED_TOKEN, UNAUTHORIZED_TOKEN, checksum};
