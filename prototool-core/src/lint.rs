//! # Lint
//!
//! A minimal rule boundary over compiled descriptors. Each [`Linter`] inspects one
//! file and reports [`Diagnostic`]s, located through the file's source info when
//! the compiler recorded it.
use crate::compile::Diagnostic;
use prost_reflect::FileDescriptor;
use prost_types::{DescriptorProto, FileDescriptorProto};

#[derive(Debug, thiserror::Error)]
pub enum LintError {
    #[error("Unknown lint rule '{0}'")]
    UnknownRule(String),
}

pub trait Linter: Send + Sync {
    /// Stable identifier, e.g. `FILE_PACKAGE_DEFINED`.
    fn id(&self) -> &'static str;
    fn purpose(&self) -> &'static str;
    fn check(&self, file: &FileDescriptor) -> Vec<Diagnostic>;
}

/// Every rule that ships with the tool.
pub fn builtin_linters() -> Vec<Box<dyn Linter>> {
    vec![Box::new(FilePackageDefined), Box::new(MessageNamesUpperCamelCase)]
}

/// The rules in effect for a run.
pub struct LintSet {
    linters: Vec<Box<dyn Linter>>,
}

impl LintSet {
    /// All built-in rules except those listed in `exclude`.
    pub fn new(exclude: &[String]) -> Result<Self, LintError> {
        let linters = builtin_linters();

        if let Some(unknown) = exclude
            .iter()
            .find(|id| !linters.iter().any(|l| l.id() == id.as_str()))
        {
            return Err(LintError::UnknownRule(unknown.clone()));
        }

        Ok(Self {
            linters: linters
                .into_iter()
                .filter(|l| !exclude.iter().any(|id| id == l.id()))
                .collect(),
        })
    }

    pub fn linters(&self) -> &[Box<dyn Linter>] {
        &self.linters
    }

    pub fn check(&self, file: &FileDescriptor) -> Vec<Diagnostic> {
        self.linters.iter().flat_map(|l| l.check(file)).collect()
    }
}

struct FilePackageDefined;

impl Linter for FilePackageDefined {
    fn id(&self) -> &'static str {
        "FILE_PACKAGE_DEFINED"
    }

    fn purpose(&self) -> &'static str {
        "Verifies that a package is defined."
    }

    fn check(&self, file: &FileDescriptor) -> Vec<Diagnostic> {
        if !file.package_name().is_empty() {
            return Vec::new();
        }

        // Field 12 of FileDescriptorProto is `syntax`, the usual first statement
        let (line, column) = locate(file.file_descriptor_proto(), &[12]).unwrap_or((1, 1));
        vec![finding(
            file,
            self.id(),
            line,
            column,
            "No package is defined.".to_string(),
        )]
    }
}

struct MessageNamesUpperCamelCase;

impl Linter for MessageNamesUpperCamelCase {
    fn id(&self) -> &'static str {
        "MESSAGE_NAMES_UPPER_CAMEL_CASE"
    }

    fn purpose(&self) -> &'static str {
        "Verifies that all message names are UpperCamelCase."
    }

    fn check(&self, file: &FileDescriptor) -> Vec<Diagnostic> {
        let proto = file.file_descriptor_proto();
        let mut found = Vec::new();

        // Field 4 of FileDescriptorProto is `message_type`
        walk_messages(&proto.message_type, vec![4], &mut |message, path| {
            let name = message.name();
            let is_map_entry = message
                .options
                .as_ref()
                .is_some_and(|o| o.map_entry());

            if is_map_entry || is_upper_camel_case(name) {
                return;
            }

            let mut name_path = path.to_vec();
            name_path.push(1);
            let (line, column) = locate(proto, &name_path)
                .or_else(|| locate(proto, path))
                .unwrap_or((0, 0));

            found.push(finding(
                file,
                self.id(),
                line,
                column,
                format!("Message name \"{name}\" must be UpperCamelCase."),
            ));
        });

        found
    }
}

/// Visits every message, nested ones included, with its source-info path.
fn walk_messages(
    messages: &[DescriptorProto],
    prefix: Vec<i32>,
    visit: &mut dyn FnMut(&DescriptorProto, &[i32]),
) {
    for (index, message) in messages.iter().enumerate() {
        let mut path = prefix.clone();
        path.push(index as i32);
        visit(message, &path);

        // Field 3 of DescriptorProto is `nested_type`
        let mut nested = path;
        nested.push(3);
        walk_messages(&message.nested_type, nested, visit);
    }
}

/// 1-based (line, column) of the element at `path`, if source info has it.
fn locate(proto: &FileDescriptorProto, path: &[i32]) -> Option<(u32, u32)> {
    let location = proto
        .source_code_info
        .as_ref()?
        .location
        .iter()
        .find(|l| l.path == path)?;

    let line = *location.span.first()?;
    let column = *location.span.get(1)?;
    Some((line as u32 + 1, column as u32 + 1))
}

fn finding(
    file: &FileDescriptor,
    id: &str,
    line: u32,
    column: u32,
    message: String,
) -> Diagnostic {
    Diagnostic {
        filename: file.name().to_string(),
        line,
        column,
        id: Some(id.to_string()),
        message,
    }
}

fn is_upper_camel_case(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && name.chars().all(|c| c.is_ascii_alphanumeric())
}
