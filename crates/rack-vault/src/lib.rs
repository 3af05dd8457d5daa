//! rack-vault: encrypted env at rest.
//!
//! Release env never touches the release row. It is rendered as a sorted
//! env file, sealed under a per-payload data key wrapped by the app's KMS
//! master key, and written to the app's settings bucket.
//!
//! ```text
//! env map ──render──► KEY=VALUE lines ──Crypt::encrypt──► {"c","k","n"}
//!                                                            │
//!                         <settings>/releases/<id>/env  ◄────┘
//! ```

pub mod env;
pub mod envelope;
pub mod error;
pub mod store;

pub use env::{parse_env, render_env};
pub use envelope::{Crypt, Envelope};
pub use error::{VaultError, VaultResult};
pub use store::{EnvStore, env_key};
