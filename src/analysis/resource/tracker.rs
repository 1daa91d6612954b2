use crate::analysis::core::cfg::{ControlFlowGraph, Location, Slot};
use crate::analysis::core::hierarchy::TypeHierarchy;
use crate::analysis::core::instruction::{Instruction, Invoke};
use crate::analysis::core::value::{ValueId, ValueNumbering};
use crate::analysis::diagnostics::{ODR_OPEN_DATABASE_RESOURCE, OS_OPEN_STREAM, UL_UNRELEASED_LOCK};
use crate::analysis::obligation::matcher::Matcher;

const LOCK: &str = "java.util.concurrent.locks.Lock";

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum TrackerKind {
    Stream,
    Lock,
}

/// A way resources of a tracker come into existence inside a procedure.
#[derive(Debug, Clone)]
pub enum ResourceFactory {
    /// `new C` with `C <: base`; classes below one of `uninteresting` are created but never reported.
    Constructor { base: String, uninteresting: Vec<String>, bug_type: String },
    /// Result of a call; `bug_type: None` marks the result uninteresting.
    MethodReturn { class: String, name: String, signature: Matcher, base: String, bug_type: Option<String> },
    StaticFieldLoad { class: String, field: String, base: String },
    InstanceFieldLoad { base: String },
    /// The receiver of an acquiring call is the resource.
    LockAcquire { base: String, name: String, signature: String },
}

/// One resource created at a known location.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceCreation {
    pub location: Location,
    pub slot: Slot,
    pub value: ValueId,
    pub class: String,
    pub base: String,
    /// `None` for resources that are tracked but never reported.
    pub bug_type: Option<String>,
    pub open_on_creation: bool,
}

impl ResourceCreation {
    pub fn is_interesting(&self) -> bool {
        self.bug_type.is_some()
    }
}

/// A method that closes the resource passed as receiver or argument.
#[derive(Debug, Clone)]
pub struct CloseRule {
    pub name: Matcher,
    pub signature: Matcher,
}

/// Data describing which resources to track and how they are closed.
#[derive(Debug, Clone)]
pub struct ResourceTracker {
    pub kind: TrackerKind,
    pub factories: Vec<ResourceFactory>,
    pub close: Vec<CloseRule>,
    /// Unchecked exception edges never leave the resource open.
    pub ignore_implicit_exceptions: bool,
    /// Resources may be wrapped by other resources of the same tracker.
    pub wraps_resources: bool,
    /// Passing the resource to a call hands it over.
    pub arguments_escape: bool,
}

fn io_stream(base: &str, uninteresting: &[&str]) -> ResourceFactory {
    ResourceFactory::Constructor {
        base: base.to_string(),
        uninteresting: uninteresting.iter().map(|class| class.to_string()).collect(),
        bug_type: OS_OPEN_STREAM.to_string(),
    }
}

fn returned(class: &str, name: &str, base: &str, bug_type: Option<&str>) -> ResourceFactory {
    ResourceFactory::MethodReturn {
        class: class.to_string(),
        name: name.to_string(),
        signature: Matcher::Any,
        base: base.to_string(),
        bug_type: bug_type.map(str::to_string),
    }
}

fn static_field(class: &str, field: &str, base: &str) -> ResourceFactory {
    ResourceFactory::StaticFieldLoad { class: class.to_string(), field: field.to_string(), base: base.to_string() }
}

fn instance_field(base: &str) -> ResourceFactory {
    ResourceFactory::InstanceFieldLoad { base: base.to_string() }
}

impl ResourceTracker {
    /// I/O streams, readers, writers, zip files and JDBC objects.
    pub fn streams() -> Self {
        let os = Some(OS_OPEN_STREAM);
        let odr = Some(ODR_OPEN_DATABASE_RESOURCE);
        let factories = vec![
            io_stream(
                "java.io.InputStream",
                &["java.io.ByteArrayInputStream", "java.io.StringBufferInputStream", "java.io.PipedInputStream"],
            ),
            io_stream("java.io.OutputStream", &["java.io.ByteArrayOutputStream", "java.io.PipedOutputStream"]),
            io_stream("java.io.Reader", &["java.io.StringReader", "java.io.CharArrayReader", "java.io.PipedReader"]),
            io_stream("java.io.Writer", &["java.io.StringWriter", "java.io.CharArrayWriter", "java.io.PipedWriter"]),
            io_stream("java.util.zip.ZipFile", &[]),
            returned("java.lang.Class", "getResourceAsStream", "java.io.InputStream", os),
            returned("java.nio.file.Files", "newInputStream", "java.io.InputStream", os),
            returned("java.nio.file.Files", "newOutputStream", "java.io.OutputStream", os),
            returned("java.nio.file.Files", "newByteChannel", "java.nio.channels.SeekableByteChannel", os),
            returned("java.nio.file.Files", "newDirectoryStream", "java.nio.file.DirectoryStream", os),
            returned("java.nio.file.Files", "newBufferedReader", "java.io.Reader", os),
            returned("java.nio.file.Files", "newBufferedWriter", "java.io.Writer", os),
            returned("java.net.Socket", "getInputStream", "java.io.InputStream", None),
            returned("java.net.Socket", "getOutputStream", "java.io.OutputStream", None),
            returned("javax.servlet.ServletRequest", "getInputStream", "java.io.InputStream", None),
            returned("javax.servlet.ServletRequest", "getReader", "java.io.Reader", None),
            returned("javax.servlet.ServletResponse", "getOutputStream", "java.io.OutputStream", None),
            returned("javax.servlet.ServletResponse", "getWriter", "java.io.Writer", None),
            returned("jakarta.servlet.ServletRequest", "getInputStream", "java.io.InputStream", None),
            returned("jakarta.servlet.ServletRequest", "getReader", "java.io.Reader", None),
            returned("jakarta.servlet.ServletResponse", "getOutputStream", "java.io.OutputStream", None),
            returned("jakarta.servlet.ServletResponse", "getWriter", "java.io.Writer", None),
            static_field("java.lang.System", "in", "java.io.InputStream"),
            static_field("java.lang.System", "out", "java.io.OutputStream"),
            static_field("java.lang.System", "err", "java.io.OutputStream"),
            instance_field("java.io.InputStream"),
            instance_field("java.io.Reader"),
            instance_field("java.io.OutputStream"),
            instance_field("java.io.Writer"),
            returned("java.sql.Connection", "prepareStatement", "java.sql.Statement", odr),
            returned("java.sql.Connection", "prepareCall", "java.sql.Statement", odr),
            returned("java.sql.Connection", "createStatement", "java.sql.Statement", odr),
            returned("java.sql.DriverManager", "getConnection", "java.sql.Connection", odr),
            returned("javax.sql.DataSource", "getConnection", "java.sql.Connection", odr),
        ];
        Self {
            kind: TrackerKind::Stream,
            factories,
            close: vec![
                CloseRule { name: Matcher::exact("close"), signature: Matcher::exact("()V") },
                CloseRule { name: Matcher::exact("closeQuietly"), signature: Matcher::Any },
            ],
            ignore_implicit_exceptions: true,
            wraps_resources: true,
            arguments_escape: true,
        }
    }

    /// `java.util.concurrent.locks.Lock` acquired with `lock()`.
    pub fn locks() -> Self {
        Self {
            kind: TrackerKind::Lock,
            factories: vec![ResourceFactory::LockAcquire {
                base: LOCK.to_string(),
                name: "lock".to_string(),
                signature: "()V".to_string(),
            }],
            close: vec![CloseRule { name: Matcher::exact("unlock"), signature: Matcher::exact("()V") }],
            ignore_implicit_exceptions: false,
            wraps_resources: false,
            arguments_escape: false,
        }
    }

    pub fn is_close_method(&self, invoke: &Invoke) -> bool {
        self.close
            .iter()
            .any(|rule| rule.name.matches_str(invoke.method_name()) && rule.signature.matches_str(invoke.signature()))
    }

    /// Instructions whose exception edges never leave a lock held: lock-field
    /// loads, calls on receivers known to be non-null, synthetic accessors and
    /// the lock API itself.
    pub fn is_exempt_thrower<V>(&self, location: Location, instruction: &Instruction, values: &V) -> bool
    where
        V: ValueNumbering + ?Sized,
    {
        if self.kind != TrackerKind::Lock {
            return false;
        }
        match instruction {
            Instruction::GetField { field, .. } => field == "lock",
            Instruction::Invoke(invoke) => {
                let name = invoke.method_name();
                name.starts_with("access$")
                    || ["readLock", "writeLock", "lock", "unlock"].contains(&name)
                    || invoke
                        .receiver
                        .as_ref()
                        .map_or(false, |receiver| values.is_definitely_non_null(location, receiver.slot))
            }
            _ => false,
        }
    }

    /// Every resource created in the procedure, in location order.
    pub fn find_creations<G, V, H>(&self, cfg: &G, values: &V, hierarchy: &H) -> Vec<ResourceCreation>
    where
        G: ControlFlowGraph + ?Sized,
        V: ValueNumbering + ?Sized,
        H: TypeHierarchy + ?Sized,
    {
        let mut creations = Vec::new();
        let mut blocks = cfg.blocks();
        blocks.sort();
        for block in blocks {
            for (index, instruction) in cfg.instructions_of(block).iter().enumerate() {
                let location = Location::new(block, index);
                if let Some(creation) = self.creation_at(location, instruction, values, hierarchy) {
                    creations.push(creation);
                }
            }
        }
        creations
    }

    fn creation_at<V, H>(&self, location: Location, instruction: &Instruction, values: &V, hierarchy: &H) -> Option<ResourceCreation>
    where
        V: ValueNumbering + ?Sized,
        H: TypeHierarchy + ?Sized,
    {
        self.factories.iter().find_map(|factory| {
            let (slot, class, base, bug_type, open_on_creation) = match (factory, instruction) {
                (ResourceFactory::Constructor { base, uninteresting, bug_type }, Instruction::New { class, dest }) => {
                    if !Matcher::subtype_of(base.as_str()).matches_type(class, hierarchy) {
                        return None;
                    }
                    let boring = uninteresting
                        .iter()
                        .any(|ignored| Matcher::subtype_of(ignored.as_str()).matches_type(class, hierarchy));
                    let bug_type = if boring { None } else { Some(bug_type.clone()) };
                    (*dest, class.clone(), base.clone(), bug_type, false)
                }
                (
                    ResourceFactory::MethodReturn { class, name, signature, base, bug_type },
                    Instruction::Invoke(invoke),
                ) => {
                    let dest = invoke.dest?;
                    if invoke.method_name() != name
                        || !signature.matches_str(invoke.signature())
                        || !Matcher::subtype_of(class.as_str()).matches_type(invoke.receiver_type(), hierarchy)
                    {
                        return None;
                    }
                    let created = invoke.return_type().unwrap_or_else(|| base.clone());
                    (dest, created, base.clone(), bug_type.clone(), true)
                }
                (
                    ResourceFactory::StaticFieldLoad { class, field, base },
                    Instruction::GetField { class: owner, field: name, is_static: true, ty, dest, .. },
                ) => {
                    if owner != class || name != field {
                        return None;
                    }
                    (*dest, ty.clone(), base.clone(), None, true)
                }
                (
                    ResourceFactory::InstanceFieldLoad { base },
                    Instruction::GetField { is_static: false, ty, dest, .. },
                ) => {
                    if !Matcher::subtype_of(base.as_str()).matches_type(ty, hierarchy) {
                        return None;
                    }
                    (*dest, ty.clone(), base.clone(), None, true)
                }
                (ResourceFactory::LockAcquire { base, name, signature }, Instruction::Invoke(invoke)) => {
                    let receiver = invoke.receiver.as_ref()?;
                    if invoke.method_name() != name
                        || invoke.signature() != signature
                        || !Matcher::subtype_of(base.as_str()).matches_type(invoke.receiver_type(), hierarchy)
                    {
                        return None;
                    }
                    let bug_type = Some(UL_UNRELEASED_LOCK.to_string());
                    (receiver.slot, invoke.receiver_type().to_string(), base.clone(), bug_type, true)
                }
                _ => return None,
            };
            Some(ResourceCreation {
                location,
                slot,
                value: values.value_id_at(location, slot),
                class,
                base,
                bug_type,
                open_on_creation,
            })
        })
    }
}
