//! Drives login exchanges against the SP.
//!
//! The physical delivery of messages is behind [`Transport`]; the orchestrator
//! decodes what the SP sends, lets the attempt build the Response, encodes it
//! for HTTP-POST and hands it back for delivery. Every exchange is bounded by
//! the login timeout.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::binding;
use crate::config::{SamlAttribute, SpConfig};
use crate::error::{Error, Result};
use crate::idp::keys::KeyMaterial;
use crate::idp::metadata::IdpSettings;
use crate::idp::response::{random_name_id, Response};
use crate::parsers::authn_request::AuthnRequest;
use crate::parsers::sp_metadata::SpMetadata;

/// A protocol message the SP sent towards the IdP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Binding URI the message arrived with.
    pub binding: String,
    /// Value of the SAMLRequest parameter, still binding-encoded.
    pub encoded: String,
    pub relay_state: Option<String>,
}

/// A Response ready to be POSTed to the SP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub acs_url: String,
    /// Base64 SAMLResponse form value.
    pub saml_response: String,
    pub relay_state: Option<String>,
}

/// One browser: cookies and state live as long as the session.
pub trait BrowserSession: Send {
    /// Start a login at the SP and capture the AuthnRequest it emits.
    fn request_login(&mut self) -> Result<InboundMessage>;

    /// Deliver a Response and report whether the SP logged the user in.
    fn post_response(&mut self, delivery: &Delivery) -> Result<bool>;
}

pub trait Transport: Send + Sync {
    /// A fresh browser session for one attempt. Every call the session makes
    /// must fit in what is left of `deadline`.
    fn session(&self, deadline: &Deadline) -> Result<Box<dyn BrowserSession>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Delivering,
    Abandoned,
}

/// Time budget of one exchange, shared by the orchestrator and the worker
/// thread running it.
///
/// Once the orchestrator gives up on the exchange no Response may be
/// delivered; once a delivery has started the orchestrator waits for it.
#[derive(Debug, Clone)]
pub struct Deadline {
    budget: Duration,
    at: Instant,
    phase: Arc<Mutex<Phase>>,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            at: Instant::now() + budget,
            phase: Arc::new(Mutex::new(Phase::Running)),
        }
    }

    /// Time left, or `Error::Timeout` once it is spent or the exchange was
    /// abandoned.
    pub fn remaining(&self) -> Result<Duration> {
        let left = self.at.saturating_duration_since(Instant::now());
        if left.is_zero() || self.phase() == Phase::Abandoned {
            return Err(Error::Timeout(self.budget));
        }
        Ok(left)
    }

    /// Claim the right to deliver a Response.
    fn begin_delivery(&self) -> Result<()> {
        let mut phase = self.lock();
        if *phase == Phase::Abandoned {
            return Err(Error::Timeout(self.budget));
        }
        *phase = Phase::Delivering;
        Ok(())
    }

    /// Give up on the exchange. False when a delivery is already under way.
    fn abandon(&self) -> bool {
        let mut phase = self.lock();
        if *phase == Phase::Delivering {
            return false;
        }
        *phase = Phase::Abandoned;
        true
    }

    fn phase(&self) -> Phase {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Respond = Box<dyn Fn(Option<&AuthnRequest>) -> Result<String> + Send + Sync>;

/// One simulated SSO round-trip. Built per login check run and used once.
pub struct LoginAttempt {
    sp_initiated: bool,
    respond: Respond,
}

impl LoginAttempt {
    /// Answer an AuthnRequest captured from the SP.
    pub fn sp_initiated<F>(respond: F) -> Self
    where
        F: Fn(Option<&AuthnRequest>) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            sp_initiated: true,
            respond: Box::new(respond),
        }
    }

    /// Push an unsolicited Response.
    pub fn idp_initiated<F>(respond: F) -> Self
    where
        F: Fn(Option<&AuthnRequest>) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            sp_initiated: false,
            respond: Box::new(respond),
        }
    }

    pub fn is_sp_initiated(&self) -> bool {
        self.sp_initiated
    }

    /// Signed Response XML for the request, or an unsolicited one for `None`.
    pub fn respond(&self, request: Option<&AuthnRequest>) -> Result<String> {
        (self.respond)(request)
    }
}

impl std::fmt::Debug for LoginAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginAttempt")
            .field("sp_initiated", &self.sp_initiated)
            .finish_non_exhaustive()
    }
}

/// What a Response needs from the run: who the IdP is, how it signs and
/// where the SP consumes Responses.
#[derive(Debug)]
pub struct IdpContext {
    pub settings: IdpSettings,
    pub keys: Arc<KeyMaterial>,
    pub attributes: Vec<SamlAttribute>,
    pub acs_override: Option<String>,
    pub default_acs: Option<String>,
    pub audience: Option<String>,
}

impl IdpContext {
    pub fn new(
        settings: IdpSettings,
        keys: Arc<KeyMaterial>,
        sp: &SpConfig,
        metadata: Option<&SpMetadata>,
    ) -> Self {
        Self {
            settings,
            keys,
            attributes: sp.attributes.clone(),
            acs_override: sp.acs_url.clone(),
            default_acs: metadata.and_then(SpMetadata::default_acs_location),
            audience: metadata.and_then(|m| m.entity_id()).map(str::to_string),
        }
    }

    /// Configured ACS, else the one the request asks for, else the SP's
    /// default ACS from its metadata.
    pub fn acs_for(&self, request: Option<&AuthnRequest>) -> Result<String> {
        self.acs_override
            .clone()
            .or_else(|| request.and_then(|r| r.assertion_consumer_service_url.clone()))
            .or_else(|| self.default_acs.clone())
            .ok_or(Error::MissingAcs)
    }

    /// Build, populate and sign a Response with a fresh NameID in `format`.
    /// With a request the Response is correlated to it; without one it is
    /// unsolicited.
    pub fn build_response(
        &self,
        request: Option<&AuthnRequest>,
        name_id_format: &str,
    ) -> Result<String> {
        let request_id = request.map(AuthnRequest::correlation_id).transpose()?;
        let destination = self.acs_for(request)?;
        let audience = request
            .and_then(|r| r.issuer.as_deref())
            .or(self.audience.as_deref());

        let mut response = Response::minimal(&self.settings.entity_id(), &destination, audience);
        response.set_name_id(&random_name_id(), name_id_format);
        response.correlate(request_id);
        response.add_attributes(&self.attributes);

        tracing::debug!(
            destination = %destination,
            in_response_to = request_id.unwrap_or("-"),
            name_id_format,
            "Built Response"
        );
        Ok(response.sign(&self.keys)?.to_xml())
    }
}

/// An AuthnRequest captured from the SP, with the binding it came with.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub binding: String,
    pub request: AuthnRequest,
}

pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    context: Arc<IdpContext>,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn Transport>, context: Arc<IdpContext>, timeout: Duration) -> Self {
        Self {
            transport,
            context,
            timeout,
        }
    }

    pub fn context(&self) -> &Arc<IdpContext> {
        &self.context
    }

    /// Run the attempts in order. The outcome at index `i` belongs to
    /// attempt `i`; a failed or timed-out attempt is `false` and the rest
    /// still run.
    pub fn run(&self, attempts: Vec<LoginAttempt>) -> Vec<bool> {
        attempts
            .into_iter()
            .enumerate()
            .map(|(index, attempt)| {
                let sp_initiated = attempt.is_sp_initiated();
                let context = Arc::clone(&self.context);
                let outcome = self.bounded(move |transport, deadline| {
                    perform(transport, deadline, &context, &attempt)
                });
                match outcome {
                    Ok(success) => {
                        tracing::info!(attempt = index, sp_initiated, success, "Login attempt finished");
                        success
                    }
                    Err(e) => {
                        tracing::warn!(attempt = index, sp_initiated, error = %e, "Login attempt failed");
                        false
                    }
                }
            })
            .collect()
    }

    /// Start one SP-initiated login and return the decoded AuthnRequest.
    pub fn capture_request(&self) -> Result<CapturedRequest> {
        self.bounded(|transport, deadline| {
            let inbound = transport.session(deadline)?.request_login()?;
            let xml = binding::decode(&inbound.binding, &inbound.encoded)?;
            let request = AuthnRequest::parse(&xml)?;
            tracing::info!(
                binding = %inbound.binding,
                id = request.id.as_deref().unwrap_or("-"),
                "Captured AuthnRequest"
            );
            Ok(CapturedRequest {
                binding: inbound.binding,
                request,
            })
        })
    }

    /// Run `work` on a worker thread and give up after the login timeout,
    /// unless a Response is already on its way to the SP.
    fn bounded<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Transport, &Deadline) -> Result<T> + Send + 'static,
    {
        let deadline = Deadline::new(self.timeout);
        let (tx, rx) = mpsc::channel();
        let transport = Arc::clone(&self.transport);
        let worker_deadline = deadline.clone();
        thread::spawn(move || {
            let _ = tx.send(work(transport.as_ref(), &worker_deadline));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) if deadline.abandon() => {
                Err(Error::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::debug!("Login timeout reached during delivery; waiting for the SP");
                rx.recv().unwrap_or_else(|_| Err(worker_stopped()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(worker_stopped()),
        }
    }
}

fn worker_stopped() -> Error {
    Error::Transport("login worker stopped without a result".to_string())
}

fn perform(
    transport: &dyn Transport,
    deadline: &Deadline,
    context: &IdpContext,
    attempt: &LoginAttempt,
) -> Result<bool> {
    let mut session = transport.session(deadline)?;

    let (request, relay_state) = if attempt.is_sp_initiated() {
        let inbound = session.request_login()?;
        let xml = binding::decode(&inbound.binding, &inbound.encoded)?;
        (Some(AuthnRequest::parse(&xml)?), inbound.relay_state)
    } else {
        (None, None)
    };

    let response_xml = attempt.respond(request.as_ref())?;
    let delivery = Delivery {
        acs_url: context.acs_for(request.as_ref())?,
        saml_response: binding::encode_post(&response_xml),
        relay_state,
    };
    deadline.begin_delivery()?;
    session.post_response(&delivery)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::initialize;
    use crate::names::{BINDING_HTTP_REDIRECT, NAMEID_FORMAT_TRANSIENT, NS_ASSERTION};
    use crate::parsers::xml;
    use std::collections::VecDeque;

    pub(crate) const REQUEST_ID: &str = "_5d4c0f1e-request";

    pub(crate) fn request_xml(id: &str) -> String {
        format!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{}" Version="2.0" AssertionConsumerServiceURL="https://sp.example.org/acs"><saml:Issuer>https://sp.example.org/shibboleth</saml:Issuer></samlp:AuthnRequest>"#,
            id
        )
    }

    /// Scripted SP: answers logins from a queue of outcomes and records
    /// every delivery.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub outcomes: Mutex<VecDeque<Result<bool>>>,
        pub deliveries: Mutex<Vec<Delivery>>,
        pub request_logins: Mutex<usize>,
        pub delay: Option<Duration>,
    }

    impl ScriptedTransport {
        pub(crate) fn with_outcomes(outcomes: Vec<Result<bool>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Self::default()
            })
        }
    }

    struct ScriptedSession(Arc<ScriptedTransport>);

    impl BrowserSession for ScriptedSession {
        fn request_login(&mut self) -> Result<InboundMessage> {
            *self.0.request_logins.lock().unwrap() += 1;
            if let Some(delay) = self.0.delay {
                thread::sleep(delay);
            }
            Ok(InboundMessage {
                binding: BINDING_HTTP_REDIRECT.to_string(),
                encoded: binding::encode_redirect(&request_xml(REQUEST_ID))?,
                relay_state: Some("ss:mem:1234".to_string()),
            })
        }

        fn post_response(&mut self, delivery: &Delivery) -> Result<bool> {
            self.0.deliveries.lock().unwrap().push(delivery.clone());
            self.0
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(false))
        }
    }

    impl Transport for Arc<ScriptedTransport> {
        fn session(&self, _deadline: &Deadline) -> Result<Box<dyn BrowserSession>> {
            Ok(Box::new(ScriptedSession(Arc::clone(self))))
        }
    }

    pub(crate) fn context() -> Arc<IdpContext> {
        let keys = KeyMaterial::generate_self_signed(initialize(), "login-test").unwrap();
        Arc::new(IdpContext {
            settings: IdpSettings::default(),
            keys: Arc::new(keys),
            attributes: Vec::new(),
            acs_override: None,
            default_acs: Some("https://sp.example.org/default-acs".to_string()),
            audience: Some("https://sp.example.org/shibboleth".to_string()),
        })
    }

    fn orchestrator(transport: Arc<ScriptedTransport>, timeout: Duration) -> Orchestrator {
        Orchestrator::new(Arc::new(transport), context(), timeout)
    }

    fn transient_attempt(ctx: &Arc<IdpContext>, sp_initiated: bool) -> LoginAttempt {
        let ctx = Arc::clone(ctx);
        let respond = move |request: Option<&AuthnRequest>| {
            ctx.build_response(request, NAMEID_FORMAT_TRANSIENT)
        };
        if sp_initiated {
            LoginAttempt::sp_initiated(respond)
        } else {
            LoginAttempt::idp_initiated(respond)
        }
    }

    fn delivered_document(delivery: &Delivery) -> xml::Document {
        xml::parse(&binding::decode_post(&delivery.saml_response).unwrap()).unwrap()
    }

    #[test]
    fn test_outcomes_follow_attempt_order() {
        let transport = ScriptedTransport::with_outcomes(vec![
            Ok(true),
            Err(Error::Transport("connection reset".to_string())),
            Ok(false),
            Ok(true),
        ]);
        let orch = orchestrator(Arc::clone(&transport), Duration::from_secs(10));
        let attempts = (0..4)
            .map(|_| transient_attempt(orch.context(), true))
            .collect();
        assert_eq!(orch.run(attempts), vec![true, false, false, true]);
        assert_eq!(transport.deliveries.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_sp_initiated_response_is_correlated() {
        let transport = ScriptedTransport::with_outcomes(vec![Ok(true)]);
        let orch = orchestrator(Arc::clone(&transport), Duration::from_secs(10));
        let attempt = transient_attempt(orch.context(), true);
        assert_eq!(orch.run(vec![attempt]), vec![true]);

        let deliveries = transport.deliveries.lock().unwrap();
        assert_eq!(deliveries[0].acs_url, "https://sp.example.org/acs");
        assert_eq!(deliveries[0].relay_state.as_deref(), Some("ss:mem:1234"));

        let doc = delivered_document(&deliveries[0]);
        assert_eq!(doc.root.attr("InResponseTo"), Some(REQUEST_ID));
        let data: Vec<_> = doc.find_all(NS_ASSERTION, "SubjectConfirmationData").collect();
        assert!(!data.is_empty());
        assert!(data.iter().all(|d| d.attr("InResponseTo") == Some(REQUEST_ID)));
    }

    #[test]
    fn test_idp_initiated_is_unsolicited() {
        let transport = ScriptedTransport::with_outcomes(vec![Ok(true)]);
        let orch = orchestrator(Arc::clone(&transport), Duration::from_secs(10));
        let attempt = transient_attempt(orch.context(), false);
        assert_eq!(orch.run(vec![attempt]), vec![true]);

        assert_eq!(*transport.request_logins.lock().unwrap(), 0);
        let deliveries = transport.deliveries.lock().unwrap();
        assert_eq!(deliveries[0].acs_url, "https://sp.example.org/default-acs");
        assert_eq!(deliveries[0].relay_state, None);
        let doc = delivered_document(&deliveries[0]);
        assert!(doc.elements().all(|e| e.attr("InResponseTo").is_none()));
    }

    #[test]
    fn test_timed_out_attempt_is_false_and_run_continues() {
        let transport = Arc::new(ScriptedTransport {
            outcomes: Mutex::new(vec![Ok(true), Ok(true)].into()),
            delay: Some(Duration::from_millis(500)),
            ..ScriptedTransport::default()
        });
        let orch = orchestrator(Arc::clone(&transport), Duration::from_millis(50));
        let attempts = vec![
            transient_attempt(orch.context(), true),
            transient_attempt(orch.context(), false),
        ];
        let outcomes = orch.run(attempts);
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0]);
    }

    #[test]
    fn test_nothing_is_delivered_after_a_timeout() {
        let transport = Arc::new(ScriptedTransport {
            outcomes: Mutex::new(vec![Ok(true)].into()),
            delay: Some(Duration::from_millis(300)),
            ..ScriptedTransport::default()
        });
        let orch = orchestrator(Arc::clone(&transport), Duration::from_millis(50));
        let attempt = transient_attempt(orch.context(), true);
        assert_eq!(orch.run(vec![attempt]), vec![false]);

        // the abandoned worker wakes up well within this
        thread::sleep(Duration::from_millis(1500));
        assert_eq!(*transport.request_logins.lock().unwrap(), 1);
        assert!(transport.deliveries.lock().unwrap().is_empty());
    }

    #[test]
    fn test_deadline() {
        let deadline = Deadline::new(Duration::from_secs(10));
        assert!(deadline.remaining().unwrap() <= Duration::from_secs(10));
        deadline.begin_delivery().unwrap();
        assert!(!deadline.abandon());
        assert!(deadline.remaining().is_ok());

        let abandoned = Deadline::new(Duration::from_secs(10));
        assert!(abandoned.abandon());
        assert!(matches!(abandoned.remaining(), Err(Error::Timeout(_))));
        assert!(matches!(abandoned.begin_delivery(), Err(Error::Timeout(_))));

        let spent = Deadline::new(Duration::ZERO);
        assert!(matches!(spent.remaining(), Err(Error::Timeout(_))));
    }

    #[test]
    fn test_capture_request() {
        let transport = ScriptedTransport::with_outcomes(Vec::new());
        let orch = orchestrator(transport, Duration::from_secs(10));
        let captured = orch.capture_request().unwrap();
        assert_eq!(captured.binding, BINDING_HTTP_REDIRECT);
        assert_eq!(captured.request.id.as_deref(), Some(REQUEST_ID));
    }

    #[test]
    fn test_capture_request_times_out() {
        let transport = Arc::new(ScriptedTransport {
            delay: Some(Duration::from_millis(500)),
            ..ScriptedTransport::default()
        });
        let orch = orchestrator(transport, Duration::from_millis(20));
        assert!(matches!(orch.capture_request(), Err(Error::Timeout(_))));
    }

    #[test]
    fn test_acs_resolution_order() {
        let mut ctx = IdpContext {
            acs_override: None,
            ..Arc::try_unwrap(context()).unwrap()
        };
        let request = AuthnRequest::parse(&request_xml("_x")).unwrap();
        assert_eq!(ctx.acs_for(Some(&request)).unwrap(), "https://sp.example.org/acs");
        assert_eq!(ctx.acs_for(None).unwrap(), "https://sp.example.org/default-acs");

        ctx.acs_override = Some("https://override.example.org/acs".to_string());
        assert_eq!(ctx.acs_for(Some(&request)).unwrap(), "https://override.example.org/acs");

        ctx.acs_override = None;
        ctx.default_acs = None;
        assert!(matches!(ctx.acs_for(None), Err(Error::MissingAcs)));
    }

    #[test]
    fn test_request_without_id_cannot_be_answered() {
        let ctx = context();
        let xml = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" AssertionConsumerServiceURL="https://sp.example.org/acs"/>"#;
        let request = AuthnRequest::parse(xml).unwrap();
        assert!(matches!(
            ctx.build_response(Some(&request), NAMEID_FORMAT_TRANSIENT),
            Err(Error::MissingCorrelationId)
        ));
    }
}
