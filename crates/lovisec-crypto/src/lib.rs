/// Lovisec text obfuscation
///
/// Post and comment text is XOR-ed against a key that ships with every client
/// and then Base64 encoded, so the raw column is not casually readable.
/// Anyone holding a client holds the key: this is obfuscation, not
/// confidentiality. Real confidentiality would need authenticated encryption
/// with per-user keys, which the backend schema does not support.

pub mod obfuscate;

pub use obfuscate::{obfuscate, reveal};
