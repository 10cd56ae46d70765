pub mod canonical;
pub mod digest;
pub mod envelope;
pub mod keypair;

pub use canonical::canonicalize;
pub use digest::{md5_hex, sha256};
pub use envelope::{verify, SignatureEnvelope, VerifyError};
pub use keypair::KeyPair;
