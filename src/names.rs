//! Namespace and identifier URIs used by the SAML2Int profile

pub const NS_METADATA: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
pub const NS_PROTOCOL: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const NS_ASSERTION: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const NS_XMLDSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const NS_XML: &str = "http://www.w3.org/XML/1998/namespace";

pub const SAML20_PROTOCOL: &str = NS_PROTOCOL;

pub const BINDING_HTTP_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
pub const BINDING_HTTP_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

pub const NAMEID_FORMAT_TRANSIENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:transient";
pub const NAMEID_FORMAT_PERSISTENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent";

pub const NAMEFORMAT_URI: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:uri";

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
pub const CM_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";
pub const AC_PASSWORD_PROTECTED_TRANSPORT: &str =
    "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport";

pub const KEY_USE_ENCRYPTION: &str = "encryption";
pub const KEY_USE_SIGNING: &str = "signing";

pub const CONTACT_TYPE_SUPPORT: &str = "support";
pub const CONTACT_TYPE_TECHNICAL: &str = "technical";

pub const LANG_ENGLISH: &str = "en";
