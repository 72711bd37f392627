//! Service descriptor adapter.
//!
//! A service descriptor is an XML document listing the modules bundled into
//! a deployable service. A descriptor may name a parent descriptor whose
//! module list is inherited; own entries override inherited ones by module
//! name. The orchestrator rewrites per-module source paths to their store
//! locations and appends modules required for testing that are not already
//! listed.

use anyhow::{Context, Result, bail};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::modmap::ModuleMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceModule {
    pub name: String,
    pub repository: Option<String>,
    pub path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ServiceDescriptor {
    path: PathBuf,
    pub modules: Vec<ServiceModule>,
}

impl ServiceDescriptor {
    /// Loads a descriptor, resolving its parent-inclusion chain. Parent
    /// modules come first; own entries replace same-named inherited ones.
    pub fn load(path: &Path) -> Result<ServiceDescriptor> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read service descriptor: {}", path.display()))?;

        let (parent, own) = parse_descriptor(&content)
            .with_context(|| format!("Failed to parse service descriptor: {}", path.display()))?;

        let mut modules: Vec<ServiceModule> = Vec::new();
        if let Some(parent_rel) = parent {
            let parent_path = path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(parent_rel);
            let parent_descriptor = ServiceDescriptor::load(&parent_path)?;
            modules = parent_descriptor.modules;
        }

        for module in own {
            if let Some(existing) = modules.iter_mut().find(|m| m.name == module.name) {
                *existing = module;
            } else {
                modules.push(module);
            }
        }

        Ok(ServiceDescriptor {
            path: path.to_path_buf(),
            modules,
        })
    }

    /// Repositories referenced by the descriptor's modules.
    pub fn repositories(&self) -> Vec<String> {
        let mut repos: Vec<String> = Vec::new();
        for module in &self.modules {
            if let Some(repo) = &module.repository {
                if !repos.contains(repo) {
                    repos.push(repo.clone());
                }
            }
        }
        repos
    }

    /// Points every listed module at its store checkout and appends
    /// test-required modules the descriptor does not list yet.
    pub fn rewrite_for_store(&mut self, map: &ModuleMap) {
        for module in &mut self.modules {
            if let Some(descriptor) = map.get(&module.name) {
                module.path = Some(descriptor.filesystem_path.clone());
                module.repository = Some(descriptor.repository.clone());
            }
        }

        for descriptor in map.modules().filter(|m| m.required_for_tests) {
            if self.modules.iter().any(|m| m.name == descriptor.name) {
                continue;
            }
            self.modules.push(ServiceModule {
                name: descriptor.name.clone(),
                repository: Some(descriptor.repository.clone()),
                path: Some(descriptor.filesystem_path.clone()),
            });
        }
    }

    /// Writes the flattened descriptor back in place. The parent reference
    /// is intentionally not re-emitted: the saved document is
    /// self-contained.
    pub fn save(&self) -> Result<()> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("service")))?;
        writer.write_event(Event::Start(BytesStart::new("items")))?;

        for module in &self.modules {
            let mut element = BytesStart::new("module");
            element.push_attribute(("name", module.name.as_str()));
            if let Some(repository) = &module.repository {
                element.push_attribute(("repository", repository.as_str()));
            }
            if let Some(path) = &module.path {
                element.push_attribute(("path", path.to_string_lossy().as_ref()));
            }
            writer.write_event(Event::Empty(element))?;
        }

        writer.write_event(Event::End(BytesEnd::new("items")))?;
        writer.write_event(Event::End(BytesEnd::new("service")))?;

        fs::write(&self.path, writer.into_inner()).with_context(|| {
            format!("Failed to write service descriptor: {}", self.path.display())
        })
    }
}

/// Returns the optional parent path and the own module entries.
fn parse_descriptor(xml: &str) -> Result<(Option<String>, Vec<ServiceModule>)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parent: Option<String> = None;
    let mut modules: Vec<ServiceModule> = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                match element.name().as_ref() {
                    b"service" => saw_root = true,
                    b"parent" => {
                        parent = attribute(&element, "path")?;
                    }
                    b"module" => {
                        let Some(name) = attribute(&element, "name")? else {
                            bail!("service module entry has no name attribute");
                        };
                        modules.push(ServiceModule {
                            name,
                            repository: attribute(&element, "repository")?,
                            path: attribute(&element, "path")?.map(PathBuf::from),
                        });
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => bail!("invalid service descriptor xml: {e}"),
        }
    }

    if !saw_root {
        bail!("service descriptor has no <service> root");
    }
    Ok((parent, modules))
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.context("invalid attribute in service descriptor")?;
        if attr.key.as_ref() == key.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
