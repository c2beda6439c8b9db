//! Per-action annotations read from the served WSDL.
//!
//! Two sources are recognized:
//! - `<documentation>` elements whose text is a JSON object
//!   `{"Action": {"Raw": true, "RemoveNS": false}, ...}`
//! - `xs:any` wrappers: an `element/complexType/sequence/any` structure for
//!   both `X_Input` and `X_Output` marks action `X` raw, unless a JSON block
//!   already annotated it

use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

const XSD_NS: &[u8] = b"http://www.w3.org/2001/XMLSchema";

/// Decode and encode flags of one action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Pass the body element's content through as XML text
    #[serde(rename = "Raw", default)]
    pub raw: bool,
    /// Move the namespace declaration of the raw content onto the output element
    #[serde(rename = "RemoveNS", default)]
    pub remove_ns: bool,
}

/// Action to annotation table, immutable once built
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    by_action: HashMap<String, Annotation>,
}

struct Open {
    local: Vec<u8>,
    schema: bool,
    name: Option<String>,
}

impl Annotations {
    pub fn new(by_action: HashMap<String, Annotation>) -> Self {
        Self { by_action }
    }

    /// Scan a WSDL document. Malformed parts are logged and skipped; whatever
    /// was read up to a syntax error is kept.
    pub fn from_wsdl(wsdl: &str) -> Self {
        let mut by_action = HashMap::new();
        let mut any_wrappers = HashSet::new();
        let mut stack: Vec<Open> = Vec::new();
        let mut reader = NsReader::from_str(wsdl);

        loop {
            let position = reader.buffer_position();
            let (ns, event) = match reader.read_resolved_event() {
                Ok(ev) => ev,
                Err(e) => {
                    warn!("WSDL scan stopped at byte {}: {}", position, e);
                    break;
                }
            };
            let schema = match ns {
                ResolveResult::Bound(ns) => ns.0 == XSD_NS,
                ResolveResult::Unbound => true,
                ResolveResult::Unknown(_) => false,
            };
            match event {
                Event::Start(e) => {
                    if schema && e.local_name().as_ref() == b"any" {
                        if let Some(name) = any_wrapper(&stack) {
                            any_wrappers.insert(name);
                        }
                    }
                    let name = e
                        .try_get_attribute("name")
                        .ok()
                        .flatten()
                        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
                    stack.push(Open {
                        local: e.local_name().as_ref().to_vec(),
                        schema,
                        name,
                    });
                }
                Event::Empty(e) if schema && e.local_name().as_ref() == b"any" => {
                    if let Some(name) = any_wrapper(&stack) {
                        any_wrappers.insert(name);
                    }
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(t) if in_documentation(&stack) => match t.unescape() {
                    Ok(text) => merge_json(&mut by_action, &text),
                    Err(e) => warn!("WSDL documentation text: {}", e),
                },
                Event::CData(c) if in_documentation(&stack) => {
                    merge_json(&mut by_action, &String::from_utf8_lossy(&c));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        for name in &any_wrappers {
            if let Some(action) = name.strip_suffix("_Input") {
                if any_wrappers.contains(&format!("{}_Output", action)) {
                    by_action.entry(action.to_string()).or_insert(Annotation {
                        raw: true,
                        remove_ns: false,
                    });
                }
            }
        }

        Self { by_action }
    }

    /// Annotation of `action`, falling back to the part after the last `/`;
    /// unknown actions get the zero annotation.
    pub fn get(&self, action: &str) -> Annotation {
        if let Some(a) = self.by_action.get(action) {
            return *a;
        }
        action
            .rsplit_once('/')
            .and_then(|(_, suffix)| self.by_action.get(suffix))
            .copied()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_action.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_action.is_empty()
    }

    /// Sorted copy of the table
    pub fn to_map(&self) -> BTreeMap<String, Annotation> {
        self.by_action.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

fn in_documentation(stack: &[Open]) -> bool {
    stack.len() > 1 && stack.last().is_some_and(|o| o.local == b"documentation")
}

/// Name of the element wrapping an `any` at `element/complexType/sequence/any`
fn any_wrapper(stack: &[Open]) -> Option<String> {
    let [.., element, complex, sequence] = stack else {
        return None;
    };
    let shape = element.local == b"element" && complex.local == b"complexType" && sequence.local == b"sequence";
    if shape && element.schema && complex.schema && sequence.schema {
        element.name.clone()
    } else {
        None
    }
}

fn merge_json(by_action: &mut HashMap<String, Annotation>, text: &str) {
    let text = text.trim();
    if !text.starts_with('{') {
        return;
    }
    match serde_json::from_str::<HashMap<String, Annotation>>(text) {
        Ok(parsed) => by_action.extend(parsed),
        Err(e) => warn!("WSDL documentation is not an annotation table: {}", e),
    }
}
