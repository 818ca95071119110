//! CLI command definitions and their execution

use anyhow::Context;
use clap::{Parser, Subcommand};
use doctrine_api::AppState;
use doctrine_core::{
    detect_sink, normalize, DoctrineConfig, DoctrineError, Enforcement, Enforcer, SchemaKind, Sink,
    ViolationReport, WriteTarget,
};
use serde_json::Value;
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::output::{
    CandidateOutput, EnforcementOutput, NormalizeOutput, NormalizedRow, OutputFormat, ReportOutput,
    SchemaListOutput, SchemaOutput, SchemaSummary,
};
use crate::{CliError, ExitCode};

/// Doctrine CLI
///
/// Enforce the base record contract on tool output and shape validated
/// records for the document, relational and columnar stores.
#[derive(Parser, Debug)]
#[command(name = "doctrine")]
#[command(about = "Doctrine - schema-contract enforcement for tool records", long_about = None)]
#[command(version)]
pub struct DoctrineCli {
    /// Output verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (TOML, YAML or JSON); DOCTRINE_* variables are used otherwise
    #[arg(short, long, global = true, env = "DOCTRINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Repair invalid candidates instead of rejecting them
    #[arg(long, global = true)]
    pub lenient: bool,

    /// Pass candidates through without validation
    #[arg(long, global = true)]
    pub disabled: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: DoctrineCommands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum DoctrineCommands {
    /// Validate candidate records against a contract
    ///
    /// The input holds one candidate object or an array of them. Reads
    /// stdin when no input file is given.
    Validate {
        /// JSON or YAML file with the candidate(s)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Contract kind: base, command, task or project
        #[arg(short, long, default_value = "base")]
        kind: SchemaKind,

        /// Name of the producing tool
        #[arg(short, long)]
        tool: String,

        /// Operation recorded with any violation
        #[arg(long, default_value = "validate")]
        operation: String,

        /// Write a violation report to this directory
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Validate candidates and project them for one or more sinks
    Format {
        /// JSON or YAML file with the candidate(s)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Contract kind: base, command, task or project
        #[arg(short, long, default_value = "base")]
        kind: SchemaKind,

        /// Name of the producing tool
        #[arg(short, long)]
        tool: String,

        /// Target sinks; every sink when omitted
        #[arg(short, long, value_delimiter = ',')]
        sink: Vec<Sink>,

        /// Wrap each record for a store: document:<collection>,
        /// relational:<table> or columnar:<dataset>.<table> (repeatable)
        #[arg(short, long)]
        envelope: Vec<WriteTarget>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Map stored sink rows back to base records
    Normalize {
        /// JSON or YAML file with the row(s)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Describe a registered contract, or list them all
    Describe {
        /// Contract kind to describe
        kind: Option<SchemaKind>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Summarize a saved violation report
    Violations {
        /// Report file written by `validate --report-dir`
        report: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Run the HTTP API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1:8080", env = "DOCTRINE_ADDR")]
        addr: SocketAddr,
    },
}

/// Global options that shape the enforcer
#[derive(Debug, Clone, Default)]
pub struct EnforcementOptions {
    pub config: Option<PathBuf>,
    pub lenient: bool,
    pub disabled: bool,
}

impl EnforcementOptions {
    /// Load the configuration and apply command-line overrides
    pub fn load_config(&self) -> anyhow::Result<DoctrineConfig> {
        let mut config = match &self.config {
            Some(path) => DoctrineConfig::from_file(path)?,
            None => DoctrineConfig::from_env(),
        };
        if self.lenient {
            config.strict = false;
        }
        if self.disabled {
            config.enabled = false;
        }
        Ok(config)
    }

    pub fn enforcer(&self) -> anyhow::Result<Enforcer> {
        Ok(Enforcer::new(self.load_config()?))
    }
}

/// Run a parsed command line
pub fn run(cli: DoctrineCli) -> anyhow::Result<ExitCode> {
    let options = EnforcementOptions {
        config: cli.config,
        lenient: cli.lenient,
        disabled: cli.disabled,
    };

    match cli.command {
        DoctrineCommands::Validate {
            input,
            kind,
            tool,
            operation,
            report_dir,
            format,
        } => execute_validate(&options, input.as_deref(), &kind, &tool, &operation, report_dir.as_deref(), format),
        DoctrineCommands::Format {
            input,
            kind,
            tool,
            sink,
            envelope,
            format,
        } => execute_format(&options, input.as_deref(), &kind, &tool, &sink, &envelope, format),
        DoctrineCommands::Normalize { input, format } => execute_normalize(input.as_deref(), format),
        DoctrineCommands::Describe { kind, format } => execute_describe(kind.as_ref(), format),
        DoctrineCommands::Violations { report, format } => execute_violations(&report, format),
        DoctrineCommands::Serve { addr } => execute_serve(&options, addr),
    }
}

/// Read a JSON or YAML document from `input`, or stdin when `None`
pub fn load_document(input: Option<&Path>) -> anyhow::Result<Value> {
    let (content, yaml) = match input {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|source| CliError::File {
                path: path.to_path_buf(),
                source,
            })?;
            let yaml = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("yaml") | Some("yml")
            );
            (content, yaml)
        }
        None => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("Failed to read stdin")?;
            (content, false)
        }
    };

    let parsed = if yaml {
        serde_yaml::from_str(&content).map_err(|e| CliError::InvalidInput(e.to_string()))?
    } else {
        serde_json::from_str(&content).map_err(|e| CliError::InvalidInput(e.to_string()))?
    };
    Ok(parsed)
}

/// Split a document into its items: an array yields its elements, anything else itself
pub fn into_items(document: Value) -> Vec<Value> {
    match document {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Enforce one candidate, folding strict-mode rejections into the output
fn enforce_candidate(
    enforcer: &Enforcer,
    index: usize,
    candidate: Value,
    kind: &SchemaKind,
    tool: &str,
    operation: &str,
) -> anyhow::Result<(CandidateOutput, Option<Enforcement>)> {
    match enforcer.enforce(candidate, kind, tool, operation) {
        Ok(outcome) => {
            let label = outcome.outcome();
            let record = match &outcome {
                Enforcement::Validated(record) | Enforcement::Repaired(record) => record.to_value(),
                Enforcement::Bypassed(value) => value.clone(),
            };
            Ok((CandidateOutput::accepted(index, label, record), Some(outcome)))
        }
        Err(DoctrineError::ContractViolation { reason, .. }) => {
            Ok((CandidateOutput::rejected(index, &reason), None))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn execute_validate(
    options: &EnforcementOptions,
    input: Option<&Path>,
    kind: &SchemaKind,
    tool: &str,
    operation: &str,
    report_dir: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let enforcer = options.enforcer()?;
    let candidates = into_items(load_document(input)?);
    tracing::debug!(count = candidates.len(), kind = %kind, tool = %tool, "Validating candidates");

    let mut output = EnforcementOutput::new(tool, operation, kind, enforcer.is_enabled(), enforcer.is_strict());
    for (index, candidate) in candidates.into_iter().enumerate() {
        let (result, _) = enforce_candidate(&enforcer, index, candidate, kind, tool, operation)?;
        output.push(result);
    }

    let report_dir = report_dir.map(Path::to_path_buf).or_else(|| enforcer.config().report_dir.clone());
    if let Some(dir) = report_dir {
        output.report = enforcer.save_violation_report_to(&dir)?;
    }

    output.render(format)?;
    Ok(output.exit_code())
}

pub fn execute_format(
    options: &EnforcementOptions,
    input: Option<&Path>,
    kind: &SchemaKind,
    tool: &str,
    sinks: &[Sink],
    envelopes: &[WriteTarget],
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let enforcer = options.enforcer()?;
    let candidates = into_items(load_document(input)?);
    let output = format_candidates(&enforcer, candidates, kind, tool, sinks, envelopes)?;

    output.render(format)?;
    Ok(output.exit_code())
}

/// Enforce each candidate, then project it for `sinks` (every sink when
/// empty) and wrap it for each write target
pub fn format_candidates(
    enforcer: &Enforcer,
    candidates: Vec<Value>,
    kind: &SchemaKind,
    tool: &str,
    sinks: &[Sink],
    envelopes: &[WriteTarget],
) -> anyhow::Result<EnforcementOutput> {
    let sinks = if sinks.is_empty() { Sink::ALL.to_vec() } else { sinks.to_vec() };

    let mut output = EnforcementOutput::new(tool, "format", kind, enforcer.is_enabled(), enforcer.is_strict());
    for (index, candidate) in candidates.into_iter().enumerate() {
        let (result, outcome) = enforce_candidate(enforcer, index, candidate, kind, tool, "format")?;

        // Bypassed candidates are only projected when they happen to be well-formed
        let record = match outcome {
            Some(Enforcement::Validated(record)) | Some(Enforcement::Repaired(record)) => record,
            Some(Enforcement::Bypassed(value)) => match enforcer.validator().validate(&value, kind) {
                Ok(record) => record,
                Err(reason) => {
                    output.push(CandidateOutput::rejected(index, &reason));
                    continue;
                }
            },
            None => {
                output.push(result);
                continue;
            }
        };

        let projections = sinks
            .iter()
            .map(|sink| enforcer.format(&record, *sink))
            .collect::<Result<Vec<_>, _>>()?;
        let wrapped = envelopes
            .iter()
            .map(|target| enforcer.envelope(&record, target))
            .collect::<Result<Vec<_>, _>>()?;
        output.push(result.with_projections(projections).with_envelopes(wrapped));
    }

    Ok(output)
}

pub fn execute_normalize(input: Option<&Path>, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let rows = into_items(load_document(input)?);
    let mut results = Vec::with_capacity(rows.len());

    for (index, row) in rows.into_iter().enumerate() {
        let object = row
            .as_object()
            .ok_or_else(|| CliError::InvalidInput(format!("row {} is not an object", index)))?;
        let sink = detect_sink(object);
        let (record, violation) = match normalize(&row) {
            Ok(record) => (Some(record.to_value()), None),
            Err(reason) => (None, Some((&reason).into())),
        };
        results.push(NormalizedRow {
            index,
            sink,
            record,
            violation,
        });
    }

    let output = NormalizeOutput { results };
    output.render(format)?;
    Ok(output.exit_code())
}

pub fn execute_describe(kind: Option<&SchemaKind>, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let enforcer = Enforcer::default();
    let contracts = enforcer.contracts();

    match kind {
        Some(kind) => {
            let fields = contracts
                .describe(kind)
                .ok_or_else(|| CliError::InvalidInput(format!("unknown contract kind '{}'", kind)))?
                .to_vec();
            SchemaOutput {
                kind: kind.clone(),
                fields,
            }
            .render(format)?;
        }
        None => {
            let schemas = contracts
                .kinds()
                .into_iter()
                .map(|kind| SchemaSummary {
                    field_count: contracts.describe(&kind).map_or(0, |fields| fields.len()),
                    kind,
                })
                .collect();
            SchemaListOutput { schemas }.render(format)?;
        }
    }
    Ok(ExitCode::Success)
}

pub fn execute_violations(report: &Path, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let content = std::fs::read_to_string(report).map_err(|source| CliError::File {
        path: report.to_path_buf(),
        source,
    })?;
    let report: ViolationReport = serde_json::from_str(&content)
        .map_err(|e| CliError::InvalidInput(format!("not a violation report: {}", e)))?;

    ReportOutput::from(report).render(format)?;
    Ok(ExitCode::Success)
}

pub fn execute_serve(options: &EnforcementOptions, addr: SocketAddr) -> anyhow::Result<ExitCode> {
    let state = AppState::new(options.load_config()?);
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime
        .block_on(doctrine_api::serve(addr, state))
        .with_context(|| format!("API server on {} failed", addr))?;
    Ok(ExitCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn candidate() -> Value {
        json!({
            "source_id": "neon-sync",
            "process_id": "nightly-import",
            "validated": true,
            "execution_signature": "3f2a9c1e0b7d4a6f8e5c2b1a0d9f8e7c",
            "timestamp_last_touched": "2024-05-01T12:30:00Z",
            "data_payload": { "rows": 12 }
        })
    }

    fn write(dir: &TempDir, name: &str, value: &Value) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, serde_json::to_string(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_parse_validate_command() {
        let cli = DoctrineCli::try_parse_from([
            "doctrine", "--lenient", "validate", "--tool", "neon-sync", "--kind", "task", "--format", "json",
        ])
        .unwrap();
        assert!(cli.lenient);
        match cli.command {
            DoctrineCommands::Validate { kind, tool, format, .. } => {
                assert_eq!(kind, SchemaKind::TASK);
                assert_eq!(tool, "neon-sync");
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_sink_list() {
        let cli = DoctrineCli::try_parse_from(["doctrine", "format", "--tool", "t", "--sink", "sql,warehouse"]).unwrap();
        match cli.command {
            DoctrineCommands::Format { sink, .. } => {
                assert_eq!(sink, vec![Sink::Relational, Sink::Columnar]);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(DoctrineCli::try_parse_from(["doctrine", "format", "--tool", "t", "--sink", "csv"]).is_err());
    }

    #[test]
    fn test_parse_envelope_targets() {
        let cli = DoctrineCli::try_parse_from([
            "doctrine",
            "format",
            "--tool",
            "t",
            "--envelope",
            "document:working_memory",
            "-e",
            "columnar:analytics.records",
        ])
        .unwrap();
        match cli.command {
            DoctrineCommands::Format { envelope, .. } => {
                assert_eq!(envelope.len(), 2);
                assert_eq!(envelope[0].sink(), Sink::Document);
                assert_eq!(envelope[1].to_string(), "columnar:analytics.records");
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(DoctrineCli::try_parse_from(["doctrine", "format", "--tool", "t", "--envelope", "relational:bad-name"]).is_err());
    }

    #[test]
    fn test_format_envelopes_per_sink() {
        let enforcer = Enforcer::new(DoctrineConfig::builder().document_ttl_seconds(30).build().unwrap());
        let targets: Vec<WriteTarget> = ["document:working_memory", "relational:shq_records", "columnar:analytics.records"]
            .iter()
            .map(|raw| raw.parse().unwrap())
            .collect();

        let output = format_candidates(
            &enforcer,
            vec![candidate(), json!({})],
            &SchemaKind::BASE,
            "neon-sync",
            &[Sink::Document],
            &targets,
        )
        .unwrap();

        assert_eq!(output.exit_code(), ExitCode::ContractViolation);
        let envelopes = serde_json::to_value(&output.results[0].envelopes).unwrap();
        assert_eq!(envelopes[0]["sink"], json!("document"));
        assert_eq!(envelopes[0]["document"]["ttl"], json!(30));
        assert_eq!(envelopes[1]["sink"], json!("relational"));
        assert_eq!(envelopes[1]["table"], json!("shq_records"));
        assert_eq!(envelopes[2]["sink"], json!("columnar"));
        assert_eq!(envelopes[2]["rows"][0]["json"]["source_id"], json!("neon-sync"));
        assert!(output.results[1].envelopes.is_empty());
    }

    #[test]
    fn test_load_document_yaml_and_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("candidate.yaml");
        fs::write(&path, "source_id: neon-sync\nvalidated: true\n").unwrap();
        let value = load_document(Some(&path)).unwrap();
        assert_eq!(value["source_id"], json!("neon-sync"));

        let err = load_document(Some(&dir.path().join("absent.json"))).unwrap_err();
        assert_eq!(crate::exit_code_for(&err), ExitCode::FileError);
    }

    #[test]
    fn test_into_items() {
        assert_eq!(into_items(json!([1, 2])).len(), 2);
        assert_eq!(into_items(json!({ "a": 1 })).len(), 1);
    }

    #[test]
    fn test_validate_exit_codes() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "good.json", &candidate());
        let mut bad_value = candidate();
        bad_value["source_id"] = json!("");
        let bad = write(&dir, "bad.json", &json!([candidate(), bad_value]));

        let strict = EnforcementOptions::default();
        let code = execute_validate(&strict, Some(&good), &SchemaKind::BASE, "neon-sync", "validate", None, OutputFormat::Json)
            .unwrap();
        assert_eq!(code, ExitCode::Success);

        let code = execute_validate(&strict, Some(&bad), &SchemaKind::BASE, "neon-sync", "validate", None, OutputFormat::Json)
            .unwrap();
        assert_eq!(code, ExitCode::ContractViolation);

        let lenient = EnforcementOptions {
            lenient: true,
            ..Default::default()
        };
        let code = execute_validate(&lenient, Some(&bad), &SchemaKind::BASE, "neon-sync", "validate", None, OutputFormat::Json)
            .unwrap();
        assert_eq!(code, ExitCode::Degraded);

        let disabled = EnforcementOptions {
            disabled: true,
            ..Default::default()
        };
        let code = execute_validate(&disabled, Some(&bad), &SchemaKind::BASE, "neon-sync", "validate", None, OutputFormat::Json)
            .unwrap();
        assert_eq!(code, ExitCode::Degraded);
    }

    #[test]
    fn test_validate_writes_report() {
        let dir = TempDir::new().unwrap();
        let input = write(&dir, "bad.json", &json!({ "process_id": "p" }));
        let reports = dir.path().join("reports");

        let code = execute_validate(
            &EnforcementOptions::default(),
            Some(&input),
            &SchemaKind::BASE,
            "imo-creator",
            "validate",
            Some(&reports),
            OutputFormat::Json,
        )
        .unwrap();
        assert_eq!(code, ExitCode::ContractViolation);

        let report = fs::read_dir(&reports).unwrap().next().unwrap().unwrap().path();
        let code = execute_violations(&report, OutputFormat::Json).unwrap();
        assert_eq!(code, ExitCode::Success);
    }

    #[test]
    fn test_validate_requires_tool() {
        let dir = TempDir::new().unwrap();
        let input = write(&dir, "good.json", &candidate());
        let err = execute_validate(
            &EnforcementOptions::default(),
            Some(&input),
            &SchemaKind::BASE,
            "",
            "validate",
            None,
            OutputFormat::Json,
        )
        .unwrap_err();
        assert_eq!(crate::exit_code_for(&err), ExitCode::InvalidInput);
    }

    #[test]
    fn test_format_and_normalize() {
        let dir = TempDir::new().unwrap();
        let input = write(&dir, "good.json", &candidate());
        let code = execute_format(
            &EnforcementOptions::default(),
            Some(&input),
            &SchemaKind::BASE,
            "neon-sync",
            &[Sink::Relational],
            &[],
            OutputFormat::Json,
        )
        .unwrap();
        assert_eq!(code, ExitCode::Success);

        let rows = write(
            &dir,
            "rows.json",
            &json!([
                {
                    "source_id": "neon-sync",
                    "task_id": "nightly-import",
                    "approved": true,
                    "process_signature": "3f2a9c1e0b7d4a6f8e5c2b1a0d9f8e7c",
                    "event_timestamp": "2024-05-01T12:30:00Z"
                },
                { "task_id": "t" }
            ]),
        );
        let code = execute_normalize(Some(&rows), OutputFormat::Json).unwrap();
        assert_eq!(code, ExitCode::ContractViolation);
    }

    #[test]
    fn test_describe() {
        assert_eq!(execute_describe(None, OutputFormat::Json).unwrap(), ExitCode::Success);
        assert_eq!(
            execute_describe(Some(&SchemaKind::COMMAND), OutputFormat::Yaml).unwrap(),
            ExitCode::Success
        );

        let err = execute_describe(Some(&SchemaKind::new("invoice")), OutputFormat::Json).unwrap_err();
        assert_eq!(crate::exit_code_for(&err), ExitCode::InvalidInput);
    }

    #[test]
    fn test_config_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doctrine.toml");
        fs::write(&path, "strict = true\nenabled = true\n").unwrap();

        let options = EnforcementOptions {
            config: Some(path),
            lenient: true,
            disabled: true,
        };
        let config = options.load_config().unwrap();
        assert!(!config.strict);
        assert!(!config.enabled);
    }
}
