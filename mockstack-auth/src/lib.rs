//! Credential parsing for MockStack
//!
//! Extracts the target service, region and signing fields from a
//! SigV4-shaped `Authorization` header. The signature is carried but never
//! cryptographically verified: the parsed credential is a routing aid, not
//! a trust boundary.

pub mod credential;

pub use credential::{parse_authorization_header, CredentialError, ParsedCredential};
