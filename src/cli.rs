use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use spconform::names::{BINDING_HTTP_REDIRECT, NAMEID_FORMAT_PERSISTENT, NAMEID_FORMAT_TRANSIENT};

/// SAML2Int Service Provider conformance tester
#[derive(Parser, Debug)]
#[command(
    name = "spconform",
    version,
    about = "Test a SAML 2.0 Service Provider against the SAML2Int profile",
    long_about = "Plays the Identity Provider towards a SAML 2.0 Service Provider. Checks the \
                  SP's metadata and AuthnRequests, performs SP-initiated and IdP-initiated \
                  logins with signed Responses, and grades the SP against the MUST, SHOULD \
                  and RECOMMENDED rules of the SAML2Int interoperability profile.",
    after_help = "\
EXAMPLES:
  spconform spconform.toml             Run every check
  spconform -v spconform.toml          Show all checks including passed
  spconform --check MD spconform.toml  Only the metadata checks
  spconform --json spconform.toml      Output results as JSON
  spconform metadata spconform.toml    Print the IdP metadata to give to the SP

EXIT CODES:
  0  Verdict OK or WARNING
  1  Verdict ERROR or CRITICAL
  2  Tool failure (e.g., unreadable config or key material)

CHECKS:
  20 checks across four categories:
    MD-001..013    SP metadata
    REQ-001..004   Authentication Request
    LOGIN-001..002 Login
    CFG-001        SP configuration

  Logging goes to stderr and follows RUST_LOG."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Run configuration (spconform.toml); defaults apply when omitted
    #[arg(value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Show all checks including passed ones
    #[arg(short, long)]
    pub verbose: bool,

    /// Output results as JSON (for scripting and CI)
    #[arg(long)]
    pub json: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Only run checks whose code starts with PREFIX (repeatable)
    #[arg(long = "check", value_name = "PREFIX")]
    pub check: Vec<String>,

    /// Skip checks whose code starts with PREFIX (repeatable)
    #[arg(long = "skip", value_name = "PREFIX")]
    pub skip: Vec<String>,

    /// File with an encoded SAMLRequest value to check instead of capturing one
    #[arg(long, value_name = "FILE")]
    pub request: Option<PathBuf>,

    /// Binding the --request value was sent with
    #[arg(long, value_name = "URI", default_value = BINDING_HTTP_REDIRECT)]
    pub binding: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the mock IdP's metadata
    Metadata {
        #[arg(value_name = "CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print a signed, base64-encoded SAMLResponse
    Respond {
        #[arg(value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Encoded SAMLRequest value the Response answers
        #[arg(long, value_name = "VALUE", required_unless_present = "unsolicited")]
        request: Option<String>,

        /// Binding the request was sent with
        #[arg(long, value_name = "URI", default_value = BINDING_HTTP_REDIRECT)]
        binding: String,

        #[arg(long, value_enum, default_value_t = NameIdFormat::Transient)]
        name_id_format: NameIdFormat,

        /// Build an IdP-initiated Response instead of answering a request
        #[arg(long, conflicts_with = "request")]
        unsolicited: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NameIdFormat {
    Transient,
    Persistent,
}

impl NameIdFormat {
    pub fn uri(self) -> &'static str {
        match self {
            NameIdFormat::Transient => NAMEID_FORMAT_TRANSIENT,
            NameIdFormat::Persistent => NAMEID_FORMAT_PERSISTENT,
        }
    }
}
