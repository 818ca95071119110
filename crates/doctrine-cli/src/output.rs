//! Output formatting for the doctrine CLI
//!
//! Every command result renders as JSON, YAML or a colored table.

use clap::ValueEnum;
use colored::Colorize;
use doctrine_core::{
    Envelope, FieldSpec, SchemaKind, Sink, SinkProjection, ViolationReason, ViolationRecord, ViolationReport,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::ExitCode;

/// Output format options for CLI results
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum OutputFormat {
    /// Human-readable table format with colors
    #[default]
    Table,
    /// JSON format for machine processing
    Json,
    /// YAML format
    Yaml,
}

fn render_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_yaml<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_yaml::to_string(value)?);
    Ok(())
}

fn header(stdout: &mut impl Write, title: &str) {
    writeln!(stdout).ok();
    writeln!(stdout, "{}", title.cyan().bold()).ok();
    writeln!(stdout, "{}", "=".repeat(60)).ok();
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Field-level cause of a rejection
#[derive(Debug, Clone, Serialize)]
pub struct ViolationOutput {
    pub field: String,
    pub rule: String,
    pub message: String,
}

impl From<&ViolationReason> for ViolationOutput {
    fn from(reason: &ViolationReason) -> Self {
        Self {
            field: reason.field().to_string(),
            rule: reason.rule().to_string(),
            message: reason.to_string(),
        }
    }
}

/// Result for one input candidate
#[derive(Debug, Clone, Serialize)]
pub struct CandidateOutput {
    pub index: usize,
    /// `validated`, `repaired`, `bypassed` or `rejected`
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub projections: Vec<SinkProjection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub envelopes: Vec<Envelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<ViolationOutput>,
}

impl CandidateOutput {
    pub fn accepted(index: usize, outcome: &str, record: Value) -> Self {
        Self {
            index,
            outcome: outcome.to_string(),
            record: Some(record),
            projections: Vec::new(),
            envelopes: Vec::new(),
            violation: None,
        }
    }

    pub fn rejected(index: usize, reason: &ViolationReason) -> Self {
        Self {
            index,
            outcome: "rejected".to_string(),
            record: None,
            projections: Vec::new(),
            envelopes: Vec::new(),
            violation: Some(reason.into()),
        }
    }

    pub fn with_projections(mut self, projections: Vec<SinkProjection>) -> Self {
        self.projections = projections;
        self
    }

    pub fn with_envelopes(mut self, envelopes: Vec<Envelope>) -> Self {
        self.envelopes = envelopes;
        self
    }
}

/// Result of `validate` and `format`
#[derive(Debug, Clone, Serialize)]
pub struct EnforcementOutput {
    pub tool: String,
    pub operation: String,
    pub kind: SchemaKind,
    pub enforcement_enabled: bool,
    pub strict_mode: bool,
    pub validated: usize,
    pub repaired: usize,
    pub bypassed: usize,
    pub rejected: usize,
    pub results: Vec<CandidateOutput>,
    /// Violation report written for this run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PathBuf>,
}

impl EnforcementOutput {
    pub fn new(tool: &str, operation: &str, kind: &SchemaKind, enabled: bool, strict: bool) -> Self {
        Self {
            tool: tool.to_string(),
            operation: operation.to_string(),
            kind: kind.clone(),
            enforcement_enabled: enabled,
            strict_mode: strict,
            validated: 0,
            repaired: 0,
            bypassed: 0,
            rejected: 0,
            results: Vec::new(),
            report: None,
        }
    }

    /// Append a result and update the tallies
    pub fn push(&mut self, result: CandidateOutput) {
        match result.outcome.as_str() {
            "validated" => self.validated += 1,
            "repaired" => self.repaired += 1,
            "bypassed" => self.bypassed += 1,
            _ => self.rejected += 1,
        }
        self.results.push(result);
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from_outcomes(self.rejected, self.repaired + self.bypassed)
    }

    pub fn render(&self, format: OutputFormat) -> anyhow::Result<()> {
        match format {
            OutputFormat::Json => render_json(self),
            OutputFormat::Yaml => render_yaml(self),
            OutputFormat::Table => {
                self.render_table();
                Ok(())
            }
        }
    }

    fn render_table(&self) {
        let mut stdout = io::stdout();
        header(&mut stdout, "Enforcement Results");

        let mode = if !self.enforcement_enabled {
            "disabled".yellow()
        } else if self.strict_mode {
            "strict".green()
        } else {
            "lenient".yellow()
        };
        writeln!(
            stdout,
            "  tool: {}  operation: {}  kind: {}  mode: {}",
            self.tool.bold(),
            self.operation,
            self.kind,
            mode
        )
        .ok();
        writeln!(stdout).ok();

        for result in &self.results {
            let icon = match result.outcome.as_str() {
                "validated" => "+".green(),
                "repaired" | "bypassed" => "~".yellow(),
                _ => "x".red(),
            };
            writeln!(stdout, "{} [{}] {}", icon, result.index, result.outcome.bold()).ok();

            if let Some(violation) = &result.violation {
                writeln!(stdout, "    {} {}", "Field:".dimmed(), violation.field).ok();
                writeln!(stdout, "    {} {}", "Rule:".dimmed(), violation.rule).ok();
                writeln!(stdout, "    {}", violation.message).ok();
            }
            if let Some(Value::Object(record)) = &result.record {
                for key in ["source_id", "process_id", "execution_signature"] {
                    if let Some(value) = record.get(key) {
                        writeln!(stdout, "    {} {}", format!("{}:", key).dimmed(), compact(value)).ok();
                    }
                }
            }
            for projection in &result.projections {
                writeln!(stdout, "    {}", projection.sink.to_string().cyan()).ok();
                for (column, value) in &projection.fields {
                    writeln!(stdout, "      {:<26} {}", column, compact(value)).ok();
                }
            }
            for envelope in &result.envelopes {
                let target = match envelope {
                    Envelope::Document(write) => write.collection.clone(),
                    Envelope::Relational(upsert) => upsert.table.clone(),
                    Envelope::Columnar(insert) => format!("{}.{}", insert.dataset, insert.table),
                };
                writeln!(stdout, "    {} {}", format!("{} write:", envelope.sink()).cyan(), target).ok();
                if let Envelope::Relational(upsert) = envelope {
                    writeln!(stdout, "      {}", upsert.sql.dimmed()).ok();
                }
            }
        }

        writeln!(stdout).ok();
        writeln!(stdout, "{}", "-".repeat(60)).ok();
        writeln!(
            stdout,
            "{} validated, {} repaired, {} bypassed, {} rejected",
            self.validated.to_string().green(),
            self.repaired.to_string().yellow(),
            self.bypassed.to_string().yellow(),
            self.rejected.to_string().red()
        )
        .ok();
        if let Some(report) = &self.report {
            writeln!(stdout, "Violation report: {}", report.display()).ok();
        }
    }
}

/// Result for one normalized row
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedRow {
    pub index: usize,
    pub sink: Sink,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<ViolationOutput>,
}

/// Result of `normalize`
#[derive(Debug, Clone, Serialize)]
pub struct NormalizeOutput {
    pub results: Vec<NormalizedRow>,
}

impl NormalizeOutput {
    pub fn exit_code(&self) -> ExitCode {
        let failed = self.results.iter().filter(|r| r.violation.is_some()).count();
        ExitCode::from_outcomes(failed, 0)
    }

    pub fn render(&self, format: OutputFormat) -> anyhow::Result<()> {
        match format {
            OutputFormat::Json => render_json(self),
            OutputFormat::Yaml => render_yaml(self),
            OutputFormat::Table => {
                let mut stdout = io::stdout();
                header(&mut stdout, "Normalized Rows");
                for row in &self.results {
                    match (&row.record, &row.violation) {
                        (Some(Value::Object(record)), _) => {
                            writeln!(stdout, "{} [{}] {} row", "+".green(), row.index, row.sink).ok();
                            for (field, value) in record {
                                writeln!(stdout, "    {:<24} {}", field, compact(value)).ok();
                            }
                        }
                        (_, Some(violation)) => {
                            writeln!(
                                stdout,
                                "{} [{}] {} row: {}",
                                "x".red(),
                                row.index,
                                row.sink,
                                violation.message
                            )
                            .ok();
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }
}

/// Result of `describe`
#[derive(Debug, Clone, Serialize)]
pub struct SchemaOutput {
    pub kind: SchemaKind,
    pub fields: Vec<FieldSpec>,
}

impl SchemaOutput {
    pub fn render(&self, format: OutputFormat) -> anyhow::Result<()> {
        match format {
            OutputFormat::Json => render_json(self),
            OutputFormat::Yaml => render_yaml(self),
            OutputFormat::Table => {
                let mut stdout = io::stdout();
                header(&mut stdout, &format!("Contract: {}", self.kind));
                writeln!(stdout, "  {:<24} {:<10} {:<9} constraints", "field", "type", "required").ok();
                writeln!(stdout, "  {}", "-".repeat(58)).ok();
                for field in &self.fields {
                    let required = if field.required {
                        "yes".green()
                    } else {
                        "no".dimmed()
                    };
                    writeln!(
                        stdout,
                        "  {:<24} {:<10} {:<9} {}",
                        field.name,
                        field.field_type.to_string(),
                        required,
                        constraints(field)
                    )
                    .ok();
                }
                Ok(())
            }
        }
    }
}

fn constraints(field: &FieldSpec) -> String {
    let mut parts = Vec::new();
    if let Some(min) = field.min_length {
        parts.push(format!("min_length={}", min));
    }
    if let Some(max) = field.max_length {
        parts.push(format!("max_length={}", max));
    }
    if !field.allowed_values.is_empty() {
        parts.push(format!("one of [{}]", field.allowed_values.join(", ")));
    }
    if let Some(default) = &field.default {
        parts.push(format!("default={}", default));
    }
    parts.join("; ")
}

/// Registered contract kinds
#[derive(Debug, Clone, Serialize)]
pub struct SchemaListOutput {
    pub schemas: Vec<SchemaSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaSummary {
    pub kind: SchemaKind,
    pub field_count: usize,
}

impl SchemaListOutput {
    pub fn render(&self, format: OutputFormat) -> anyhow::Result<()> {
        match format {
            OutputFormat::Json => render_json(self),
            OutputFormat::Yaml => render_yaml(self),
            OutputFormat::Table => {
                let mut stdout = io::stdout();
                header(&mut stdout, "Registered Contracts");
                for schema in &self.schemas {
                    writeln!(stdout, "  {:<16} {} fields", schema.kind.to_string().bold(), schema.field_count).ok();
                }
                Ok(())
            }
        }
    }
}

/// A saved violation report, summarized
#[derive(Debug, Clone, Serialize)]
pub struct ReportOutput {
    pub timestamp: String,
    pub total_violations: usize,
    pub enforcement_enabled: bool,
    pub strict_mode: bool,
    pub by_tool: BTreeMap<String, usize>,
    pub violations: Vec<ViolationRecord>,
}

impl From<ViolationReport> for ReportOutput {
    fn from(report: ViolationReport) -> Self {
        let mut by_tool = BTreeMap::new();
        for violation in &report.violations {
            *by_tool.entry(violation.tool.clone()).or_insert(0) += 1;
        }
        Self {
            timestamp: report.timestamp.to_rfc3339(),
            total_violations: report.total_violations,
            enforcement_enabled: report.enforcement_enabled,
            strict_mode: report.strict_mode,
            by_tool,
            violations: report.violations,
        }
    }
}

impl ReportOutput {
    pub fn render(&self, format: OutputFormat) -> anyhow::Result<()> {
        match format {
            OutputFormat::Json => render_json(self),
            OutputFormat::Yaml => render_yaml(self),
            OutputFormat::Table => {
                let mut stdout = io::stdout();
                header(&mut stdout, "Violation Report");
                writeln!(stdout, "  generated: {}", self.timestamp).ok();
                writeln!(
                    stdout,
                    "  total: {}  strict: {}  enabled: {}",
                    self.total_violations.to_string().red().bold(),
                    self.strict_mode,
                    self.enforcement_enabled
                )
                .ok();
                writeln!(stdout).ok();

                if !self.by_tool.is_empty() {
                    writeln!(stdout, "{}", "By tool:".cyan().bold()).ok();
                    for (tool, count) in &self.by_tool {
                        writeln!(stdout, "  {:<24} {}", tool, count).ok();
                    }
                    writeln!(stdout).ok();
                }

                for violation in &self.violations {
                    writeln!(
                        stdout,
                        "{} #{} {}.{} {}",
                        "x".red(),
                        violation.sequence,
                        violation.tool.bold(),
                        violation.operation,
                        violation.detected_at.to_rfc3339().dimmed()
                    )
                    .ok();
                    writeln!(stdout, "    {} {} ({})", "Field:".dimmed(), violation.field, violation.rule).ok();
                    writeln!(stdout, "    {}", violation.reason).ok();
                }
                Ok(())
            }
        }
    }
}
