pub mod authn_request;
pub mod certificate;
pub mod sp_metadata;
pub mod xml;
