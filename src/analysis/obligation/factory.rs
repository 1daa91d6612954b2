use std::collections::HashMap;
use std::fmt;

use crate::analysis::core::hierarchy::{HierarchyError, TypeHierarchy};
use crate::analysis::core::signature::is_reference_class;
use crate::roa_debug;

/// Interned id of a resource category, e.g. `java.io.FileInputStream`.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub struct ObligationKind(u16);

impl ObligationKind {
    pub fn id(&self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_id(id: usize) -> Self {
        ObligationKind(id as u16)
    }
}

impl fmt::Display for ObligationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owns every obligation kind of an analysis run; kinds are named after the class they track.
#[derive(Debug, Clone, Default)]
pub struct ObligationFactory {
    names: Vec<String>,
    by_name: HashMap<String, ObligationKind>,
}

impl ObligationFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_obligation(&mut self, class_name: &str) -> ObligationKind {
        if let Some(kind) = self.by_name.get(class_name) {
            return *kind;
        }
        let kind = ObligationKind(self.names.len() as u16);
        self.names.push(class_name.to_string());
        self.by_name.insert(class_name.to_string(), kind);
        kind
    }

    pub fn get_obligation_by_name(&self, class_name: &str) -> Option<ObligationKind> {
        self.by_name.get(class_name).copied()
    }

    pub fn name(&self, kind: ObligationKind) -> &str {
        self.names.get(kind.id()).map_or("<unknown obligation>", String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn kinds(&self) -> impl Iterator<Item = ObligationKind> + '_ {
        (0..self.names.len()).map(|id| ObligationKind(id as u16))
    }

    /// The kind tracking `ty`: an exact match, else the first kind whose class is a supertype.
    pub fn get_obligation_by_type<H>(&self, ty: &str, hierarchy: &H) -> Result<Option<ObligationKind>, HierarchyError>
    where
        H: TypeHierarchy + ?Sized,
    {
        if !is_reference_class(ty) {
            return Ok(None);
        }
        if let Some(kind) = self.get_obligation_by_name(ty) {
            return Ok(Some(kind));
        }
        for kind in self.kinds() {
            if hierarchy.is_subtype_of(ty, self.name(kind))? {
                return Ok(Some(kind));
            }
        }
        Ok(None)
    }

    /// Like [`Self::get_obligation_by_type`], with a missing class treated as "no obligation".
    pub fn kind_for_type<H>(&self, ty: &str, hierarchy: &H) -> Option<ObligationKind>
    where
        H: TypeHierarchy + ?Sized,
    {
        match self.get_obligation_by_type(ty, hierarchy) {
            Ok(kind) => kind,
            Err(err) => {
                roa_debug!("Missing class while resolving the obligation of {}: {}", ty, err);
                None
            }
        }
    }

    pub fn get_parameter_obligation_types<H>(&self, parameter_types: &[String], hierarchy: &H) -> Vec<Option<ObligationKind>>
    where
        H: TypeHierarchy + ?Sized,
    {
        parameter_types
            .iter()
            .map(|ty| self.kind_for_type(ty, hierarchy))
            .collect()
    }
}
