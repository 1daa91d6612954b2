use std::collections::{HashMap, HashSet, VecDeque};

use snafu::Snafu;

use super::model::Program;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum HierarchyError {
    #[snafu(display("class {} is missing from the analyzed closure", class))]
    MissingClass { class: String },
}

/// Subtype oracle used by type matchers.
pub trait TypeHierarchy {
    fn is_subtype_of(&self, sub: &str, sup: &str) -> Result<bool, HierarchyError>;
}

const OBJECT: &str = "java.lang.Object";

// (class, supertypes) of the platform classes the built-in policies refer to.
const PLATFORM_CLASSES: &[(&str, &[&str])] = &[
    ("java.lang.Object", &[]),
    ("java.lang.AutoCloseable", &[]),
    ("java.lang.String", &[OBJECT]),
    ("java.lang.Class", &[OBJECT]),
    ("java.lang.System", &[OBJECT]),
    ("java.lang.Throwable", &[OBJECT]),
    ("java.lang.Exception", &["java.lang.Throwable"]),
    ("java.io.IOException", &["java.lang.Exception"]),
    ("java.io.Closeable", &["java.lang.AutoCloseable"]),
    ("java.io.Flushable", &[]),
    ("java.io.InputStream", &[OBJECT, "java.io.Closeable"]),
    ("java.io.FileInputStream", &["java.io.InputStream"]),
    ("java.io.FilterInputStream", &["java.io.InputStream"]),
    ("java.io.BufferedInputStream", &["java.io.FilterInputStream"]),
    ("java.io.DataInputStream", &["java.io.FilterInputStream"]),
    ("java.io.ObjectInputStream", &["java.io.InputStream"]),
    ("java.io.ByteArrayInputStream", &["java.io.InputStream"]),
    ("java.io.StringBufferInputStream", &["java.io.InputStream"]),
    ("java.io.PipedInputStream", &["java.io.InputStream"]),
    ("java.util.zip.InflaterInputStream", &["java.io.FilterInputStream"]),
    ("java.util.zip.GZIPInputStream", &["java.util.zip.InflaterInputStream"]),
    ("java.util.zip.ZipInputStream", &["java.util.zip.InflaterInputStream"]),
    ("java.io.OutputStream", &[OBJECT, "java.io.Closeable", "java.io.Flushable"]),
    ("java.io.FileOutputStream", &["java.io.OutputStream"]),
    ("java.io.FilterOutputStream", &["java.io.OutputStream"]),
    ("java.io.BufferedOutputStream", &["java.io.FilterOutputStream"]),
    ("java.io.DataOutputStream", &["java.io.FilterOutputStream"]),
    ("java.io.PrintStream", &["java.io.FilterOutputStream"]),
    ("java.io.ObjectOutputStream", &["java.io.OutputStream"]),
    ("java.io.ByteArrayOutputStream", &["java.io.OutputStream"]),
    ("java.io.PipedOutputStream", &["java.io.OutputStream"]),
    ("java.io.Reader", &[OBJECT, "java.io.Closeable"]),
    ("java.io.InputStreamReader", &["java.io.Reader"]),
    ("java.io.FileReader", &["java.io.InputStreamReader"]),
    ("java.io.BufferedReader", &["java.io.Reader"]),
    ("java.io.StringReader", &["java.io.Reader"]),
    ("java.io.CharArrayReader", &["java.io.Reader"]),
    ("java.io.PipedReader", &["java.io.Reader"]),
    ("java.io.Writer", &[OBJECT, "java.io.Closeable", "java.io.Flushable"]),
    ("java.io.OutputStreamWriter", &["java.io.Writer"]),
    ("java.io.FileWriter", &["java.io.OutputStreamWriter"]),
    ("java.io.BufferedWriter", &["java.io.Writer"]),
    ("java.io.PrintWriter", &["java.io.Writer"]),
    ("java.io.StringWriter", &["java.io.Writer"]),
    ("java.io.CharArrayWriter", &["java.io.Writer"]),
    ("java.io.PipedWriter", &["java.io.Writer"]),
    ("java.io.RandomAccessFile", &[OBJECT, "java.io.Closeable"]),
    ("java.util.zip.ZipFile", &[OBJECT, "java.io.Closeable"]),
    ("java.util.Properties", &[OBJECT]),
    ("java.util.logging.StreamHandler", &[OBJECT]),
    ("java.security.KeyStore", &[OBJECT]),
    ("java.nio.channels.FileChannel", &[OBJECT, "java.io.Closeable"]),
    ("java.nio.file.Files", &[OBJECT]),
    ("java.net.Socket", &[OBJECT, "java.io.Closeable"]),
    ("javax.servlet.ServletRequest", &[]),
    ("javax.servlet.ServletResponse", &[]),
    ("jakarta.servlet.ServletRequest", &[]),
    ("jakarta.servlet.ServletResponse", &[]),
    ("java.nio.channels.SeekableByteChannel", &["java.io.Closeable"]),
    ("java.nio.file.DirectoryStream", &["java.io.Closeable"]),
    ("java.sql.DriverManager", &[OBJECT]),
    ("javax.sql.DataSource", &[]),
    ("java.sql.Connection", &["java.lang.AutoCloseable"]),
    ("java.sql.Statement", &["java.lang.AutoCloseable"]),
    ("java.sql.PreparedStatement", &["java.sql.Statement"]),
    ("java.sql.CallableStatement", &["java.sql.PreparedStatement"]),
    ("java.sql.ResultSet", &["java.lang.AutoCloseable"]),
    ("java.util.concurrent.locks.Lock", &[]),
    ("java.util.concurrent.locks.ReadWriteLock", &[]),
    ("java.util.concurrent.locks.ReentrantLock", &[OBJECT, "java.util.concurrent.locks.Lock"]),
    (
        "java.util.concurrent.locks.ReentrantReadWriteLock",
        &[OBJECT, "java.util.concurrent.locks.ReadWriteLock"],
    ),
    (
        "java.util.concurrent.locks.ReentrantReadWriteLock$ReadLock",
        &[OBJECT, "java.util.concurrent.locks.Lock"],
    ),
    (
        "java.util.concurrent.locks.ReentrantReadWriteLock$WriteLock",
        &[OBJECT, "java.util.concurrent.locks.Lock"],
    ),
];

/// Class hierarchy over the analyzed program plus a skeleton of the platform classes.
#[derive(Debug, Clone)]
pub struct ClassHierarchy {
    supertypes: HashMap<String, Vec<String>>,
}

impl Default for ClassHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassHierarchy {
    pub fn new() -> Self {
        let mut hierarchy = Self { supertypes: HashMap::new() };
        for (class, supers) in PLATFORM_CLASSES {
            hierarchy.add_class(class, supers.iter().map(|s| s.to_string()).collect());
        }
        hierarchy
    }

    pub fn from_program(program: &Program) -> Self {
        let mut hierarchy = Self::new();
        for class in &program.classes {
            let mut supers: Vec<String> = class.super_class.iter().cloned().collect();
            supers.extend(class.interfaces.iter().cloned());
            hierarchy.add_class(&class.name, supers);
        }
        hierarchy
    }

    pub fn add_class(&mut self, class: &str, supertypes: Vec<String>) {
        self.supertypes.insert(class.to_string(), supertypes);
    }

    pub fn contains(&self, class: &str) -> bool {
        self.supertypes.contains_key(class)
    }
}

impl TypeHierarchy for ClassHierarchy {
    fn is_subtype_of(&self, sub: &str, sup: &str) -> Result<bool, HierarchyError> {
        if sub == sup || sup == OBJECT {
            return Ok(true);
        }

        let mut missing = None;
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(sub);

        while let Some(class) = queue.pop_front() {
            if !seen.insert(class) {
                continue;
            }
            match self.supertypes.get(class) {
                Some(supers) => {
                    for s in supers {
                        if s == sup {
                            return Ok(true);
                        }
                        queue.push_back(s.as_str());
                    }
                }
                None => {
                    missing.get_or_insert_with(|| class.to_string());
                }
            }
        }

        match missing {
            Some(class) => Err(HierarchyError::MissingClass { class }),
            None => Ok(false),
        }
    }
}
