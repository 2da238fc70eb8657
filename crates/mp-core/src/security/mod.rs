//! Credential security: reversible session secret encryption and one-way
//! password hashing under the administrator's chosen scheme.

pub mod codec;
pub mod password;
pub mod session;
