//! Assessment item definitions.

use qti_interchange::{EndAttemptControl, ItemDocument};

use super::declarations::{is_builtin, parse_declaration, VariableDeclaration, VariableKind};
use super::expression::{parse_expression, Expression};
use super::rules::{parse_rules, ProcessingRule};
use super::{get_str, EvalError};

/// An immutable, shareable item definition.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentItem {
    pub identifier: String,
    pub title: Option<String>,
    pub adaptive: bool,
    pub time_dependent: bool,
    pub response_declarations: Vec<VariableDeclaration>,
    pub outcome_declarations: Vec<VariableDeclaration>,
    pub template_declarations: Vec<VariableDeclaration>,
    pub template_processing: Vec<ProcessingRule>,
    pub response_processing: Vec<ProcessingRule>,
    pub end_attempts: Vec<EndAttemptControl>,
    builtins: Vec<VariableDeclaration>,
}

/// Template value supplied from outside the item (an item ref's
/// `templateDefault`), overriding the declared template default.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDefault {
    pub template_identifier: String,
    pub expression: Expression,
}

impl TemplateDefault {
    pub fn from_json(v: &serde_json::Value) -> Result<Self, EvalError> {
        Ok(TemplateDefault {
            template_identifier: get_str(v, "templateIdentifier")?,
            expression: parse_expression(v.get("expression").ok_or_else(|| {
                EvalError::deserialize("templateDefault missing 'expression'")
            })?)?,
        })
    }
}

fn parse_declarations(
    list: &[serde_json::Value],
    kind: VariableKind,
) -> Result<Vec<VariableDeclaration>, EvalError> {
    list.iter().map(|d| parse_declaration(d, kind)).collect()
}

impl AssessmentItem {
    /// Build an item from its package document.
    pub fn from_document(doc: &ItemDocument) -> Result<Self, EvalError> {
        let wrap = |e: EvalError| match e {
            EvalError::DeserializeError { message } => {
                EvalError::deserialize(format!("item '{}': {}", doc.identifier, message))
            }
            other => other,
        };
        let response_declarations =
            parse_declarations(&doc.response_declarations, VariableKind::Response).map_err(wrap)?;
        let outcome_declarations =
            parse_declarations(&doc.outcome_declarations, VariableKind::Outcome).map_err(wrap)?;
        let template_declarations =
            parse_declarations(&doc.template_declarations, VariableKind::Template).map_err(wrap)?;

        // Built-ins an author did not declare explicitly.
        let mut builtins = Vec::new();
        for builtin in [
            VariableDeclaration::completion_status(),
            VariableDeclaration::num_attempts(),
            VariableDeclaration::duration(),
        ] {
            let declared = response_declarations
                .iter()
                .chain(&outcome_declarations)
                .any(|d| d.identifier == builtin.identifier);
            if !declared {
                builtins.push(builtin);
            }
        }

        Ok(AssessmentItem {
            identifier: doc.identifier.clone(),
            title: doc.title.clone(),
            adaptive: doc.adaptive,
            time_dependent: doc.time_dependent,
            template_processing: parse_rules(&doc.template_processing).map_err(wrap)?,
            response_processing: parse_rules(&doc.response_processing).map_err(wrap)?,
            end_attempts: doc.end_attempts.clone(),
            response_declarations,
            outcome_declarations,
            template_declarations,
            builtins,
        })
    }

    /// Every declaration in scope, built-ins last.
    pub fn declarations(&self) -> impl Iterator<Item = &VariableDeclaration> {
        self.response_declarations
            .iter()
            .chain(&self.outcome_declarations)
            .chain(&self.template_declarations)
            .chain(&self.builtins)
    }

    pub fn declaration(&self, identifier: &str) -> Option<&VariableDeclaration> {
        self.declarations().find(|d| d.identifier == identifier)
    }

    /// Response declarations written by the author (built-ins excluded).
    pub fn authored_responses(&self) -> impl Iterator<Item = &VariableDeclaration> {
        self.response_declarations
            .iter()
            .filter(|d| !is_builtin(&d.identifier))
    }

    /// The end-attempt control bound to a response, if any.
    pub fn end_attempt(&self, response_identifier: &str) -> Option<&EndAttemptControl> {
        self.end_attempts
            .iter()
            .find(|e| e.response_identifier == response_identifier)
    }
}
