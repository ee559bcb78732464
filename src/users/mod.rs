/// User accounts: the model, its storage backends and one-time tokens.

mod model;
mod store;
mod tokens;

pub use model::{NewUser, User, UserPatch, DEFAULT_ROLE};
pub use store::{MemoryUserStore, PgUserStore, UserStore};
pub use tokens::{MemoryUserTokenStore, PgUserTokenStore, TokenPurpose, UserToken, UserTokenStore};
