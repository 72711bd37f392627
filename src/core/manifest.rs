//! # Module Manifest Parsing / 模块清单解析
//!
//! Turns the XML manifest found in every module directory into a typed
//! [`ModuleManifest`]. Malformed input fails with a [`ManifestParseError`]
//! instead of propagating an untyped structure.
//!
//! 将每个模块目录中的 XML 清单解析为类型化的 [`ModuleManifest`]。
//! 格式错误的输入会以 [`ManifestParseError`] 失败，而不是传播无类型结构。
//!
//! The expected shape:
//!
//! ```xml
//! <module name="Core">
//!     <depends>
//!         <module name="Env" />
//!         <submodule name="Core/_private" />
//!     </depends>
//!     <unit_test browser="true" />
//! </module>
//! ```

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestParseError {
    #[error("invalid manifest xml: {0}")]
    Xml(String),
    #[error("manifest root element must be <module>, found <{0}>")]
    UnexpectedRoot(String),
    #[error("manifest has no root element")]
    Empty,
    #[error("<{0}> element has no name attribute")]
    MissingName(String),
}

/// Typed view of one module manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleManifest {
    pub name: String,
    /// Module-type and submodule-type dependencies, in declaration order.
    pub dependencies: Vec<String>,
    pub has_unit_tests: bool,
    pub test_in_browser: bool,
}

/// Parses a manifest document.
pub fn parse_manifest(xml: &str) -> Result<ModuleManifest, ManifestParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut manifest: Option<ModuleManifest> = None;
    let mut in_depends = false;
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                handle_element(&element, &mut manifest, &mut in_depends, depth, false)?;
                depth += 1;
            }
            Ok(Event::Empty(element)) => {
                handle_element(&element, &mut manifest, &mut in_depends, depth, true)?;
            }
            Ok(Event::End(element)) => {
                depth = depth.saturating_sub(1);
                if local_name(element.name().as_ref()) == "depends" {
                    in_depends = false;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ManifestParseError::Xml(e.to_string())),
        }
    }

    manifest.ok_or(ManifestParseError::Empty)
}

fn handle_element(
    element: &BytesStart<'_>,
    manifest: &mut Option<ModuleManifest>,
    in_depends: &mut bool,
    depth: usize,
    empty: bool,
) -> Result<(), ManifestParseError> {
    let tag = local_name(element.name().as_ref());

    if depth == 0 {
        if tag != "module" {
            return Err(ManifestParseError::UnexpectedRoot(tag));
        }
        let name = required_name(element, "module")?;
        *manifest = Some(ModuleManifest {
            name,
            dependencies: Vec::new(),
            has_unit_tests: false,
            test_in_browser: false,
        });
        return Ok(());
    }

    let Some(manifest) = manifest.as_mut() else {
        return Err(ManifestParseError::Empty);
    };

    match tag.as_str() {
        "depends" => {
            if !empty {
                *in_depends = true;
            }
        }
        "module" | "submodule" if *in_depends => {
            manifest.dependencies.push(required_name(element, &tag)?);
        }
        "unit_test" => {
            manifest.has_unit_tests = true;
            if attribute(element, "browser").as_deref() == Some("true") {
                manifest.test_in_browser = true;
            }
        }
        // Manifests carry sections this tool has no use for; they are
        // skipped, not rejected.
        _ => {}
    }
    Ok(())
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Option<String> {
    element.attributes().flatten().find_map(|attr| {
        if attr.key.as_ref() == key.as_bytes() {
            attr.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

fn required_name(element: &BytesStart<'_>, tag: &str) -> Result<String, ManifestParseError> {
    attribute(element, "name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ManifestParseError::MissingName(tag.to_string()))
}
