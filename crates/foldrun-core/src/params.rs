//! Per-invocation rewriting of the tool's parameter file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use xmltree::{Element, XMLNode};

use crate::error::{FoldrunError, Result};
use crate::runlog::{parse_xml, write_xml, RunType};

/// Fields that change between invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamOverrides {
    pub run_type: RunType,
    pub run_number: u32,
    pub set_name: String,
    pub num_classes: usize,
}

impl ParamOverrides {
    fn fields(&self) -> [(&'static str, String); 4] {
        [
            ("run-type", self.run_type.as_str().to_string()),
            ("run-number", self.run_number.to_string()),
            ("set-name", self.set_name.clone()),
            ("number-of-classes", self.num_classes.to_string()),
        ]
    }
}

/// Path of the working copy written next to `template`:
/// `startparameters.xml` becomes `startparameters-mod.xml`.
pub fn working_copy_path(template: &Path) -> PathBuf {
    let stem = template
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "parameters".to_string());
    template.with_file_name(format!("{stem}-mod.xml"))
}

fn set_text(root: &mut Element, file: &Path, field: &str, value: String) -> Result<()> {
    let child = root
        .get_mut_child(field)
        .ok_or_else(|| FoldrunError::MissingParamField {
            file: file.to_path_buf(),
            field: field.to_string(),
        })?;
    child.children = vec![XMLNode::Text(value)];
    Ok(())
}

/// Apply `overrides` to `template` and write the working copy. Every other
/// element of the template is kept as is.
pub fn rewrite_params(template: &Path, overrides: &ParamOverrides) -> Result<PathBuf> {
    let mut root = parse_xml(template)?;
    for (field, value) in overrides.fields() {
        set_text(&mut root, template, field, value)?;
    }

    let out = working_copy_path(template);
    write_xml(&root, &out)?;
    debug!(
        template = %template.display(),
        working_copy = %out.display(),
        run_type = %overrides.run_type,
        set_name = %overrides.set_name,
        "Rewrote parameters"
    );
    Ok(out)
}

/// Rewrite the template and copy the result to `destination`, where the tool
/// reads it from.
pub fn install_params(
    template: &Path,
    overrides: &ParamOverrides,
    destination: &Path,
) -> Result<PathBuf> {
    let working = rewrite_params(template, overrides)?;
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&working, destination)?;
    Ok(working)
}
