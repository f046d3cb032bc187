mod cli;

use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::control;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, NameIdFormat};
use spconform::checks::{self, HttpFetcher};
use spconform::config::{IdpConfig, RunConfig};
use spconform::idp::keys::KeyMaterial;
use spconform::idp::metadata;
use spconform::login::{CapturedRequest, IdpContext, Orchestrator};
use spconform::output::{self, OutputFormat};
use spconform::parsers::authn_request::AuthnRequest;
use spconform::runner::{self, RequestSubject, Subjects};
use spconform::transport::HttpTransport;
use spconform::{binding, filter, CryptoReady};

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        control::set_override(false);
    }
    init_logging(cli.verbose);

    let ready = spconform::initialize();
    let outcome = match &cli.command {
        Some(Command::Metadata { config }) => print_metadata(ready, config.as_deref()),
        Some(Command::Respond {
            config,
            request,
            binding,
            name_id_format,
            ..
        }) => respond(
            ready,
            config.as_deref(),
            request.as_deref(),
            binding,
            *name_id_format,
        ),
        None => run_suite(ready, &cli),
    };

    match outcome {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(2);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "spconform=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Configured key pair, or an ephemeral one when neither file is set.
fn load_keys(ready: CryptoReady, idp: &IdpConfig) -> Result<KeyMaterial> {
    match (&idp.certificate, &idp.private_key) {
        (Some(cert), Some(key)) => {
            KeyMaterial::load(ready, cert, key).context("Failed to load IdP key material")
        }
        (None, None) => KeyMaterial::generate_self_signed(ready, &idp.settings.hostname)
            .context("Failed to generate IdP key material"),
        _ => bail!("[idp] certificate and private_key must be configured together"),
    }
}

fn print_metadata(ready: CryptoReady, config_path: Option<&Path>) -> Result<i32> {
    let config = RunConfig::load(config_path)?;
    let xml = if config.idp.certificate.is_some() || config.idp.private_key.is_some() {
        let keys = load_keys(ready, &config.idp)?;
        metadata::generate_with_key(&config.idp.settings, &keys)?
    } else {
        metadata::generate(&config.idp.settings)
    };
    print!("{}", xml);
    Ok(0)
}

fn respond(
    ready: CryptoReady,
    config_path: Option<&Path>,
    request: Option<&str>,
    binding_uri: &str,
    format: NameIdFormat,
) -> Result<i32> {
    let config = RunConfig::load(config_path)?;
    let keys = Arc::new(load_keys(ready, &config.idp)?);
    let sp_metadata = config.sp.load_metadata();
    let context = IdpContext::new(
        config.idp.settings.clone(),
        keys,
        &config.sp,
        sp_metadata.as_ref(),
    );

    let request = request
        .map(|value| decode_request(value, binding_uri))
        .transpose()?;
    let xml = context
        .build_response(request.as_ref(), format.uri())
        .context("Failed to build Response")?;
    println!("{}", binding::encode_post(&xml));
    Ok(0)
}

fn decode_request(value: &str, binding_uri: &str) -> Result<AuthnRequest> {
    let xml = binding::decode(binding_uri, value.trim()).context("Failed to decode SAMLRequest")?;
    AuthnRequest::parse(&xml).context("Failed to parse AuthnRequest")
}

fn request_subject(path: Option<&Path>, binding_uri: &str) -> Result<RequestSubject> {
    let Some(path) = path else {
        return Ok(RequestSubject::Capture);
    };
    let value = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request {}", path.display()))?;
    Ok(match decode_request(&value, binding_uri) {
        Ok(request) => RequestSubject::Provided(CapturedRequest {
            binding: binding_uri.to_string(),
            request,
        }),
        Err(e) => RequestSubject::Unavailable(format!(
            "the Authentication Request could not be decoded ({:#})",
            e
        )),
    })
}

fn run_suite(ready: CryptoReady, cli: &Cli) -> Result<i32> {
    let config = RunConfig::load(cli.config.as_deref())?;
    let keys = Arc::new(load_keys(ready, &config.idp)?);
    let sp_metadata = config.sp.load_metadata();
    let context = Arc::new(IdpContext::new(
        config.idp.settings.clone(),
        keys,
        &config.sp,
        sp_metadata.as_ref(),
    ));

    let orchestrator = config.sp.login_url.as_ref().map(|_| {
        let transport = HttpTransport::from_config(&config.sp);
        Orchestrator::new(Arc::new(transport), Arc::clone(&context), config.timeouts.login())
    });
    if orchestrator.is_none() {
        tracing::warn!("No SP login_url configured; login checks will not be performed");
    }

    let fetcher = Arc::new(HttpFetcher::new(config.timeouts.metadata_fetch()));
    let include = (!cli.check.is_empty()).then_some(cli.check.as_slice());
    let exclude = (!cli.skip.is_empty()).then_some(cli.skip.as_slice());
    let cases = filter::apply_filters(checks::catalog(fetcher), include, exclude);

    let subjects = Subjects {
        metadata: sp_metadata.as_ref(),
        sp: &config.sp,
        request: request_subject(cli.request.as_deref(), &cli.binding)?,
        orchestrator: orchestrator.as_ref(),
    };
    let report = runner::run(&cases, &subjects);

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Terminal
    };
    output::print_report(&report, cli.verbose, format, &config.idp.settings);

    Ok(if report.summary.has_failures() { 1 } else { 0 })
}
