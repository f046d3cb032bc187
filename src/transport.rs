//! Built-in browser driver on top of `ureq`.
//!
//! Each session owns its own agent so the SP's session cookie survives from
//! the login request to the Response delivery and nothing leaks between
//! attempts. Redirects are followed by hand: the SP redirects the browser to
//! the IdP, and that hop is where the AuthnRequest is captured instead of
//! being fetched.

use scraper::{Html, Selector};
use ureq::http::Response;
use ureq::{Agent, Body};
use url::Url;

use crate::config::SpConfig;
use crate::error::{Error, Result};
use crate::login::{BrowserSession, Deadline, Delivery, InboundMessage, Transport};
use crate::names::{BINDING_HTTP_POST, BINDING_HTTP_REDIRECT};

const MAX_HOPS: usize = 10;

/// What the SP's page must look like after a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCriteria {
    pub status: u16,
    pub content: Option<String>,
}

impl LoginCriteria {
    pub fn is_met(&self, status: u16, body: &str) -> bool {
        status == self.status
            && self
                .content
                .as_deref()
                .map(|needle| body.contains(needle))
                .unwrap_or(true)
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    login_url: Option<String>,
    criteria: LoginCriteria,
}

impl HttpTransport {
    pub fn new(login_url: Option<String>, criteria: LoginCriteria) -> Self {
        Self {
            login_url,
            criteria,
        }
    }

    pub fn from_config(sp: &SpConfig) -> Self {
        Self::new(
            sp.login_url.clone(),
            LoginCriteria {
                status: sp.login_status_code,
                content: sp.login_content.clone(),
            },
        )
    }
}

impl Transport for HttpTransport {
    fn session(&self, deadline: &Deadline) -> Result<Box<dyn BrowserSession>> {
        let config = Agent::config_builder()
            .max_redirects(0)
            .max_redirects_will_error(false)
            .http_status_as_error(false)
            .build();
        Ok(Box::new(HttpSession {
            agent: Agent::new_with_config(config),
            deadline: deadline.clone(),
            login_url: self.login_url.clone(),
            criteria: self.criteria.clone(),
        }))
    }
}

struct HttpSession {
    agent: Agent,
    deadline: Deadline,
    login_url: Option<String>,
    criteria: LoginCriteria,
}

impl HttpSession {
    /// GET bounded by what is left of the attempt's budget.
    fn get(&self, url: &str) -> Result<Response<Body>> {
        let budget = self.deadline.remaining()?;
        tracing::debug!(url = %url, "GET");
        self.agent
            .get(url)
            .config()
            .timeout_global(Some(budget))
            .build()
            .call()
            .map_err(transport_error)
    }
}

impl BrowserSession for HttpSession {
    fn request_login(&mut self) -> Result<InboundMessage> {
        let mut url = self
            .login_url
            .clone()
            .ok_or_else(|| Error::Transport("no SP login URL is configured".to_string()))?;

        for _ in 0..MAX_HOPS {
            let response = self.get(&url)?;

            if let Some(location) = location(&response) {
                let next = resolve(&url, &location)?;
                if let Some(message) = redirect_message(&next) {
                    return Ok(message);
                }
                url = next.to_string();
                continue;
            }

            let body = read_body(response)?;
            return post_message(&body).ok_or_else(|| {
                Error::Transport(format!("{} did not lead to an AuthnRequest", url))
            });
        }
        Err(Error::Transport(format!(
            "more than {} redirects while starting the login",
            MAX_HOPS
        )))
    }

    fn post_response(&mut self, delivery: &Delivery) -> Result<bool> {
        let mut form = vec![("SAMLResponse", delivery.saml_response.as_str())];
        if let Some(relay_state) = delivery.relay_state.as_deref() {
            form.push(("RelayState", relay_state));
        }

        let budget = self.deadline.remaining()?;
        tracing::debug!(url = %delivery.acs_url, "POST");
        let mut response = self
            .agent
            .post(&delivery.acs_url)
            .config()
            .timeout_global(Some(budget))
            .build()
            .send_form(form)
            .map_err(transport_error)?;
        let mut url = delivery.acs_url.clone();

        for _ in 0..MAX_HOPS {
            let Some(location) = location(&response) else {
                let status = response.status().as_u16();
                let body = read_body(response)?;
                let success = self.criteria.is_met(status, &body);
                tracing::debug!(url = %url, status, success, "Login landing page");
                return Ok(success);
            };
            url = resolve(&url, &location)?.to_string();
            response = self.get(&url)?;
        }
        Ok(false)
    }
}

fn transport_error(e: ureq::Error) -> Error {
    Error::Transport(e.to_string())
}

fn read_body(response: Response<Body>) -> Result<String> {
    response
        .into_body()
        .read_to_string()
        .map_err(transport_error)
}

fn location(response: &Response<Body>) -> Option<String> {
    if !response.status().is_redirection() {
        return None;
    }
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn resolve(base: &str, location: &str) -> Result<Url> {
    Url::parse(base)
        .and_then(|b| b.join(location))
        .map_err(|e| Error::Transport(format!("bad redirect target '{}': {}", location, e)))
}

/// The HTTP-Redirect message carried in a redirect target's query, if any.
fn redirect_message(url: &Url) -> Option<InboundMessage> {
    let mut encoded = None;
    let mut relay_state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "SAMLRequest" => encoded = Some(value.into_owned()),
            "RelayState" => relay_state = Some(value.into_owned()),
            _ => {}
        }
    }
    Some(InboundMessage {
        binding: BINDING_HTTP_REDIRECT.to_string(),
        encoded: encoded?,
        relay_state,
    })
}

/// The HTTP-POST message carried in an auto-submit form, if any.
fn post_message(html: &str) -> Option<InboundMessage> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("input[name]").ok()?;

    let mut encoded = None;
    let mut relay_state = None;
    for input in document.select(&selector) {
        let value = input.value().attr("value").unwrap_or_default().to_string();
        match input.value().attr("name") {
            Some("SAMLRequest") => encoded = Some(value),
            Some("RelayState") => relay_state = Some(value),
            _ => {}
        }
    }
    Some(InboundMessage {
        binding: BINDING_HTTP_POST.to_string(),
        encoded: encoded?,
        relay_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_criteria() {
        let criteria = LoginCriteria {
            status: 200,
            content: Some("Welcome".to_string()),
        };
        assert!(criteria.is_met(200, "<h1>Welcome back</h1>"));
        assert!(!criteria.is_met(200, "<h1>Login failed</h1>"));
        assert!(!criteria.is_met(500, "Welcome"));

        let status_only = LoginCriteria {
            status: 200,
            content: None,
        };
        assert!(status_only.is_met(200, ""));
    }

    #[test]
    fn test_redirect_message_from_location() {
        let url = resolve(
            "https://sp.example.org/Shibboleth.sso/Login",
            "http://localhost:8080/sso?SAMLRequest=fZJbb%2B&RelayState=ss%3Amem%3A1",
        )
        .unwrap();
        let message = redirect_message(&url).unwrap();
        assert_eq!(message.binding, BINDING_HTTP_REDIRECT);
        assert_eq!(message.encoded, "fZJbb+");
        assert_eq!(message.relay_state.as_deref(), Some("ss:mem:1"));
    }

    #[test]
    fn test_plain_redirect_is_not_a_message() {
        let url = resolve("https://sp.example.org/app", "/Shibboleth.sso/Login?target=x").unwrap();
        assert_eq!(url.as_str(), "https://sp.example.org/Shibboleth.sso/Login?target=x");
        assert!(redirect_message(&url).is_none());
    }

    #[test]
    fn test_post_message_from_form() {
        let html = r#"<html><body onload="document.forms[0].submit()">
<form method="post" action="http://localhost:8080/sso">
  <INPUT type="hidden" name="RelayState" value="cookie&#x3a;1234"/>
  <input type='hidden' name='SAMLRequest' value='PHNhbWxwOkF1dGhuUmVxdWVzdA&#x3d;&#x3d;'>
  <input type="submit" value="Continue"/>
</form></body></html>"#;
        let message = post_message(html).unwrap();
        assert_eq!(message.binding, BINDING_HTTP_POST);
        assert_eq!(message.encoded, "PHNhbWxwOkF1dGhuUmVxdWVzdA==");
        assert_eq!(message.relay_state.as_deref(), Some("cookie:1234"));
    }

    #[test]
    fn test_page_without_request() {
        assert!(post_message("<html><input name=\"q\" value=\"1\"></html>").is_none());
    }

    #[test]
    fn test_post_message_value_with_markup_characters() {
        let html = r#"<form method="post" action="http://localhost:8080/sso">
<input type="hidden" name="RelayState" value="https://sp.example.org/app?a=1>b&amp;c=2"/>
<input type="hidden" name="SAMLRequest" value="PHNhbWxw"/>
</form>"#;
        let message = post_message(html).unwrap();
        assert_eq!(
            message.relay_state.as_deref(),
            Some("https://sp.example.org/app?a=1>b&c=2")
        );
        assert_eq!(message.encoded, "PHNhbWxw");
    }

    #[test]
    fn test_request_login_without_url_fails() {
        let transport = HttpTransport::new(
            None,
            LoginCriteria {
                status: 200,
                content: None,
            },
        );
        let deadline = Deadline::new(Duration::from_secs(1));
        let mut session = transport.session(&deadline).unwrap();
        assert!(matches!(session.request_login(), Err(Error::Transport(_))));
    }

    #[test]
    fn test_spent_deadline_stops_requests() {
        let transport = HttpTransport::new(
            Some("http://127.0.0.1:9/Shibboleth.sso/Login".to_string()),
            LoginCriteria {
                status: 200,
                content: None,
            },
        );
        let deadline = Deadline::new(Duration::ZERO);
        let mut session = transport.session(&deadline).unwrap();
        assert!(matches!(session.request_login(), Err(Error::Timeout(_))));
        let delivery = Delivery {
            acs_url: "http://127.0.0.1:9/acs".to_string(),
            saml_response: "PHNhbWxw".to_string(),
            relay_state: None,
        };
        assert!(matches!(session.post_response(&delivery), Err(Error::Timeout(_))));
    }
}
