use platform::{Document, ElementId, FetchRequest, FetchResponse, FileInfo};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::closure::ClosureRef;
use crate::pending::PromiseRef;
use crate::state::ObserverRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(pub u32);

/// Nesting past this renders as `[...]` and has no JSON form.
const MAX_DEPTH: usize = 64;

/// Containers currently being rendered, outermost first.
type Path = Vec<*const ()>;

/// Run `f` one container deeper. `None` on a cycle or past [`MAX_DEPTH`].
fn descend<T>(path: &mut Path, id: *const (), f: impl FnOnce(&mut Path) -> T) -> Option<T> {
    if path.len() >= MAX_DEPTH || path.contains(&id) {
        return None;
    }
    path.push(id);
    let out = f(path);
    path.pop();
    Some(out)
}

/// Everything a handle can stand for.
///
/// Cloning is cheap: composite values share their storage, so two handles
/// boxing the same array see each other's pushes.
#[derive(Debug, Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
    Array(Rc<RefCell<Vec<HostValue>>>),
    Object(Rc<RefCell<BTreeMap<String, HostValue>>>),
    Error(Rc<HostError>),
    Element(ElementId),
    Request(Rc<RefCell<FetchRequest>>),
    Response(Rc<FetchResponse>),
    Promise(PromiseRef),
    Closure(ClosureRef),
    Observer(ObserverRef),
    File(Rc<FileInfo>),
}

impl HostValue {
    pub fn string(value: impl Into<Rc<str>>) -> Self {
        HostValue::String(value.into())
    }

    pub fn array(items: Vec<HostValue>) -> Self {
        HostValue::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: impl IntoIterator<Item = (String, HostValue)>) -> Self {
        HostValue::Object(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    pub fn error(error: HostError) -> Self {
        HostValue::Error(Rc::new(error))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, HostValue::Closure(_))
    }

    /// `typeof value === "object" && value !== null`.
    pub fn is_object(&self) -> bool {
        !matches!(
            self,
            HostValue::Undefined
                | HostValue::Null
                | HostValue::Bool(_)
                | HostValue::Number(_)
                | HostValue::String(_)
                | HostValue::Closure(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&HostError> {
        match self {
            HostValue::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Property lookup for the value kinds that have named fields.
    pub fn property(&self, key: &str) -> Option<HostValue> {
        match self {
            HostValue::Object(entries) => entries.borrow().get(key).cloned(),
            HostValue::Error(error) => match key {
                "name" => Some(HostValue::string(error.name.as_str())),
                "message" => Some(HostValue::string(error.message.as_str())),
                "stack" => Some(HostValue::string(error.stack.as_str())),
                _ => None,
            },
            HostValue::File(file) => match key {
                "name" => Some(HostValue::string(file.name.as_str())),
                "size" => Some(HostValue::Number(file.size as f64)),
                "lastModified" => Some(HostValue::Number(file.last_modified_ms)),
                _ => None,
            },
            HostValue::Response(response) => match key {
                "status" => Some(HostValue::Number(f64::from(response.status))),
                "ok" => Some(HostValue::Bool(response.ok())),
                "url" => Some(HostValue::string(response.url.as_str())),
                _ => None,
            },
            HostValue::Array(items) if key == "length" => {
                Some(HostValue::Number(items.borrow().len() as f64))
            }
            _ => None,
        }
    }

    /// Human-readable rendering used by `debug_string` and panic messages.
    pub fn debug_string(&self, document: &dyn Document) -> String {
        let mut out = String::new();
        self.render(document, &mut out, &mut Path::new());
        out
    }

    /// Self-containing arrays print `[Circular]` where they recur.
    fn render(&self, document: &dyn Document, out: &mut String, path: &mut Path) {
        match self {
            HostValue::Undefined => out.push_str("undefined"),
            HostValue::Null => out.push_str("null"),
            HostValue::Bool(value) => out.push_str(if *value { "true" } else { "false" }),
            HostValue::Number(value) => out.push_str(&format_number(*value)),
            HostValue::String(value) => {
                let _ = write!(out, "\"{value}\"");
            }
            HostValue::Bytes(bytes) => {
                let _ = write!(out, "Uint8Array({})", bytes.len());
            }
            HostValue::Array(items) => {
                let id = Rc::as_ptr(items) as *const ();
                if path.contains(&id) {
                    out.push_str("[Circular]");
                    return;
                }
                let rendered = descend(path, id, |path| {
                    out.push('[');
                    for (index, item) in items.borrow().iter().enumerate() {
                        if index > 0 {
                            out.push_str(", ");
                        }
                        item.render(document, out, path);
                    }
                    out.push(']');
                });
                if rendered.is_none() {
                    out.push_str("[...]");
                }
            }
            HostValue::Object(_) => match self.json(path) {
                Some(json) => {
                    let _ = write!(out, "Object({json})");
                }
                None => out.push_str("Object"),
            },
            HostValue::Error(error) => {
                let _ = write!(out, "{}: {}", error.name, error.message);
                if !error.stack.is_empty() {
                    let _ = write!(out, "\n{}", error.stack);
                }
            }
            HostValue::Element(element) => match document.tag_name(*element) {
                Ok(tag) => {
                    let _ = write!(out, "Element(<{}>)", tag.to_ascii_lowercase());
                }
                Err(_) => out.push_str("Element"),
            },
            HostValue::Request(request) => {
                let request = request.borrow();
                let _ = write!(out, "Request({} {})", request.method, request.url);
            }
            HostValue::Response(response) => {
                let _ = write!(out, "Response({} {})", response.status, response.url);
            }
            HostValue::Promise(_) => out.push_str("Promise"),
            HostValue::Closure(_) => out.push_str("Function"),
            HostValue::Observer(_) => out.push_str("ResizeObserver"),
            HostValue::File(file) => {
                let _ = write!(out, "File({})", file.name);
            }
        }
    }

    /// JSON form of plain data. `None` once anything opaque is reachable,
    /// or when the value contains itself.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        self.json(&mut Path::new())
    }

    fn json(&self, path: &mut Path) -> Option<serde_json::Value> {
        use serde_json::Value;
        Some(match self {
            HostValue::Null => Value::Null,
            HostValue::Bool(value) => Value::Bool(*value),
            HostValue::Number(value) => serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            HostValue::String(value) => Value::String(value.to_string()),
            HostValue::Array(items) => {
                let id = Rc::as_ptr(items) as *const ();
                let items = descend(path, id, |path| {
                    items
                        .borrow()
                        .iter()
                        .map(|item| item.json(path))
                        .collect::<Option<Vec<_>>>()
                })??;
                Value::Array(items)
            }
            HostValue::Object(entries) => {
                let id = Rc::as_ptr(entries) as *const ();
                let entries = descend(path, id, |path| {
                    entries
                        .borrow()
                        .iter()
                        .map(|(key, value)| value.json(path).map(|value| (key.clone(), value)))
                        .collect::<Option<serde_json::Map<_, _>>>()
                })??;
                Value::Object(entries)
            }
            _ => return None,
        })
    }
}

/// Numbers the way a JS engine prints them.
fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if value == 0.0 {
        "0".to_string()
    } else {
        value.to_string()
    }
}

/// A boxed host failure: what the guest sees when a fallible call fails or a
/// promise rejects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub name: String,
    pub message: String,
    pub stack: String,
}

impl HostError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: String::new(),
        }
    }

    /// Platform adapters prefix messages with a DOM exception name
    /// (`"NotFoundError: ..."`); that prefix becomes the error name.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let text = err.to_string();
        let (name, message) = match text.split_once(": ") {
            Some((name, message)) if is_error_name(name) => (name.to_string(), message.to_string()),
            _ => ("Error".to_string(), text),
        };
        let stack = err
            .chain()
            .skip(1)
            .map(|cause| format!("    caused by: {cause}"))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            name,
            message,
            stack,
        }
    }
}

fn is_error_name(name: &str) -> bool {
    name.ends_with("Error")
        && name.starts_with(|c: char| c.is_ascii_uppercase())
        && name.chars().all(|c| c.is_ascii_alphanumeric())
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}
