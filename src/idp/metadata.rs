use serde::Deserialize;

use crate::error::Result;
use crate::idp::keys::KeyMaterial;
use crate::idp::xml_escape;
use crate::names::{
    BINDING_HTTP_REDIRECT, KEY_USE_SIGNING, NS_METADATA, NS_XMLDSIG, SAML20_PROTOCOL,
};

/// Where the mock IdP lives. Loaded from the `[idp]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IdpSettings {
    /// Defaults to the SSO URL.
    pub entity_id: Option<String>,
    pub protocol: String,
    pub hostname: String,
    pub port: u16,
    pub sso_path: String,
}

impl Default for IdpSettings {
    fn default() -> Self {
        Self {
            entity_id: None,
            protocol: "http".to_string(),
            hostname: "localhost".to_string(),
            port: 8080,
            sso_path: "/sso".to_string(),
        }
    }
}

impl IdpSettings {
    pub fn sso_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.protocol, self.hostname, self.port, self.sso_path
        )
    }

    pub fn entity_id(&self) -> String {
        self.entity_id.clone().unwrap_or_else(|| self.sso_url())
    }
}

/// The IdP's metadata: one EntityDescriptor, one IDPSSODescriptor and one
/// HTTP-Redirect SingleSignOnService.
pub fn generate(settings: &IdpSettings) -> String {
    render(settings, None)
}

/// Like [`generate`], with the signing certificate published in a
/// `KeyDescriptor use="signing"`.
pub fn generate_with_key(settings: &IdpSettings, key: &KeyMaterial) -> Result<String> {
    Ok(render(settings, Some(&key.certificate_base64_der()?)))
}

fn render(settings: &IdpSettings, certificate_b64: Option<&str>) -> String {
    let key_descriptor = certificate_b64
        .map(|cert| {
            format!(
                r#"
    <md:KeyDescriptor use="{}">
      <ds:KeyInfo xmlns:ds="{}">
        <ds:X509Data>
          <ds:X509Certificate>{}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>"#,
                KEY_USE_SIGNING, NS_XMLDSIG, cert
            )
        })
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="{}" entityID="{}">
  <md:IDPSSODescriptor protocolSupportEnumeration="{}">{}
    <md:SingleSignOnService Binding="{}" Location="{}"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>
"#,
        NS_METADATA,
        xml_escape(&settings.entity_id()),
        SAML20_PROTOCOL,
        key_descriptor,
        BINDING_HTTP_REDIRECT,
        xml_escape(&settings.sso_url()),
    )
}
