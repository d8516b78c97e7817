//! Sequence generators behind auto-increment columns.
//!
//! Default expressions are recognized by a small hand-written parser that
//! accepts exactly two shapes:
//!
//! ```text
//! nextval('[schema.]name'[::type])      PostgreSQL
//! [schema.]name.NEXTVAL                 Oracle
//! ```
//!
//! Keywords are case-insensitive, whitespace is free and every name part may
//! be double-quoted. Anything else is not a sequence reference.

use crate::error::MigrationWarning;
use crate::introspection::{SchemaIntrospector, SequenceDescriptor};
use crate::migration::writer::{escape_literal, qualify, DestinationWriter};
use serde::Serialize;
use tracing::{debug, info, warn};

/// A sequence named by a column default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRef {
    pub schema: Option<String>,
    /// Bare name as written in the default
    pub name: String,
}

impl SequenceRef {
    /// Name of the sequence at the destination
    pub fn dest_name(&self) -> String {
        self.name.to_lowercase()
    }
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
}

impl Scanner {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.chars.len()
    }

    /// A bare word or a double-quoted identifier (`""` escapes a quote)
    fn name_part(&mut self) -> Option<String> {
        self.skip_ws();
        if self.peek() == Some('"') {
            self.pos += 1;
            let mut part = String::new();
            loop {
                match self.peek()? {
                    '"' if self.chars.get(self.pos + 1) == Some(&'"') => {
                        part.push('"');
                        self.pos += 2;
                    }
                    '"' => {
                        self.pos += 1;
                        break;
                    }
                    ch => {
                        part.push(ch);
                        self.pos += 1;
                    }
                }
            }
            (!part.is_empty()).then_some(part)
        } else {
            let start = self.pos;
            while self
                .peek()
                .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '#'))
            {
                self.pos += 1;
            }
            (self.pos > start).then(|| self.chars[start..self.pos].iter().collect())
        }
    }

    fn qualified_name(&mut self) -> Option<Vec<String>> {
        let mut parts = vec![self.name_part()?];
        while self.eat('.') {
            parts.push(self.name_part()?);
        }
        Some(parts)
    }
}

fn into_ref(mut parts: Vec<String>) -> Option<SequenceRef> {
    match parts.len() {
        1 => Some(SequenceRef {
            schema: None,
            name: parts.remove(0),
        }),
        2 => {
            let name = parts.remove(1);
            Some(SequenceRef {
                schema: Some(parts.remove(0)),
                name,
            })
        }
        _ => None,
    }
}

fn parse_nextval_call(scanner: &mut Scanner) -> Option<SequenceRef> {
    let keyword = scanner.name_part()?;
    if !keyword.eq_ignore_ascii_case("nextval") || !scanner.eat('(') || !scanner.eat('\'') {
        return None;
    }
    let parts = scanner.qualified_name()?;
    if !scanner.eat('\'') {
        return None;
    }
    if scanner.eat(':') {
        if !scanner.eat(':') {
            return None;
        }
        scanner.name_part()?;
    }
    if !scanner.eat(')') || !scanner.at_end() {
        return None;
    }
    into_ref(parts)
}

fn parse_dot_nextval(scanner: &mut Scanner) -> Option<SequenceRef> {
    let mut parts = scanner.qualified_name()?;
    if !scanner.at_end() || parts.len() < 2 {
        return None;
    }
    let last = parts.pop()?;
    if !last.eq_ignore_ascii_case("nextval") {
        return None;
    }
    into_ref(parts)
}

/// Extract the sequence a default expression draws from, if any
pub fn parse_sequence_ref(expr: &str) -> Option<SequenceRef> {
    parse_nextval_call(&mut Scanner::new(expr)).or_else(|| parse_dot_nextval(&mut Scanner::new(expr)))
}

/// `CREATE SEQUENCE` carrying the source parameters that PostgreSQL accepts
pub fn create_sequence_sql(schema: &str, name: &str, desc: &SequenceDescriptor) -> String {
    let mut sql = format!("CREATE SEQUENCE {}", qualify(schema, name));
    if let Some(increment) = desc.increment.filter(|i| *i != 0) {
        sql.push_str(&format!(" INCREMENT BY {}", increment));
    }
    if let Some(min) = desc.min_value {
        sql.push_str(&format!(" MINVALUE {}", min));
    }
    if let Some(max) = desc.max_value {
        sql.push_str(&format!(" MAXVALUE {}", max));
    }
    if let Some(start) = desc.start {
        sql.push_str(&format!(" START WITH {}", start));
    }
    if let Some(cache) = desc.cache.filter(|c| *c >= 1) {
        sql.push_str(&format!(" CACHE {}", cache));
    }
    sql
}

pub fn create_sequence_default_sql(schema: &str, name: &str) -> String {
    format!("CREATE SEQUENCE {}", qualify(schema, name))
}

pub fn create_sequence_if_not_exists_sql(schema: &str, name: &str) -> String {
    format!("CREATE SEQUENCE IF NOT EXISTS {}", qualify(schema, name))
}

/// How a destination sequence came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceOutcome {
    AlreadyExists,
    CopiedParameters,
    CreatedWithDefaults,
    CreatedIfNotExists,
    Failed,
}

impl SequenceOutcome {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, SequenceOutcome::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct SequenceResolution {
    pub dest_schema: String,
    pub dest_name: String,
    pub outcome: SequenceOutcome,
    pub warnings: Vec<MigrationWarning>,
    pub errors: Vec<String>,
}

impl SequenceResolution {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.dest_schema, self.dest_name)
    }

    /// Default expression pointing at the destination sequence
    pub fn nextval_expr(&self) -> String {
        format!(
            "nextval('{}'::regclass)",
            escape_literal(&qualify(&self.dest_schema, &self.dest_name))
        )
    }
}

/// Makes sure the sequences referenced by source defaults exist at the destination
pub struct SequenceResolver<'a> {
    source: &'a dyn SchemaIntrospector,
    dest: &'a dyn DestinationWriter,
    dest_schema: &'a str,
}

impl<'a> SequenceResolver<'a> {
    pub fn new(source: &'a dyn SchemaIntrospector, dest: &'a dyn DestinationWriter, dest_schema: &'a str) -> Self {
        Self {
            source,
            dest,
            dest_schema,
        }
    }

    /// Resolve one reference. `source_schema` applies when the reference is unqualified.
    ///
    /// Tries, in order: full parameters read from the source, destination
    /// defaults, then `IF NOT EXISTS`. Each step down is recorded as a warning.
    pub async fn resolve(&self, source_schema: &str, sequence: &SequenceRef) -> SequenceResolution {
        let dest_name = sequence.dest_name();
        let mut resolution = SequenceResolution {
            dest_schema: self.dest_schema.to_string(),
            dest_name: dest_name.clone(),
            outcome: SequenceOutcome::Failed,
            warnings: Vec::new(),
            errors: Vec::new(),
        };
        let label = resolution.qualified_name();

        match self.dest.sequence_exists(self.dest_schema, &dest_name).await {
            Ok(true) => {
                debug!("Sequence {} already exists", label);
                resolution.outcome = SequenceOutcome::AlreadyExists;
                return resolution;
            }
            Ok(false) => {}
            Err(e) => resolution.degrade(&label, format!("existence check failed: {}", e)),
        }

        let source_schema = sequence.schema.as_deref().unwrap_or(source_schema);
        let with_parameters = match self.source.sequence_metadata(source_schema, &sequence.name).await {
            Ok(desc) => self
                .dest
                .execute_sequence_ddl(&create_sequence_sql(self.dest_schema, &dest_name, &desc))
                .await
                .map_err(|e| format!("creating with source parameters failed: {}", e)),
            Err(e) => Err(format!("reading source parameters failed: {}", e)),
        };
        match with_parameters {
            Ok(()) => {
                info!("Created sequence {} with source parameters", label);
                resolution.outcome = SequenceOutcome::CopiedParameters;
                return resolution;
            }
            Err(reason) => resolution.degrade(&label, format!("{}; using default parameters", reason)),
        }

        match self
            .dest
            .execute_sequence_ddl(&create_sequence_default_sql(self.dest_schema, &dest_name))
            .await
        {
            Ok(()) => {
                info!("Created sequence {} with default parameters", label);
                resolution.outcome = SequenceOutcome::CreatedWithDefaults;
                return resolution;
            }
            Err(e) => resolution.degrade(&label, format!("plain create failed: {}; retrying with IF NOT EXISTS", e)),
        }

        match self
            .dest
            .execute_sequence_ddl(&create_sequence_if_not_exists_sql(self.dest_schema, &dest_name))
            .await
        {
            Ok(()) => resolution.outcome = SequenceOutcome::CreatedIfNotExists,
            Err(e) => {
                warn!("Could not create sequence {}: {}", label, e);
                resolution
                    .errors
                    .push(format!("sequence {} could not be created: {}", label, e));
            }
        }
        resolution
    }
}

impl SequenceResolution {
    fn degrade(&mut self, label: &str, detail: String) {
        warn!("Sequence {}: {}", label, detail);
        self.warnings.push(MigrationWarning::SequenceDegrade {
            sequence: label.to_string(),
            detail,
        });
    }
}
