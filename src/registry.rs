//! The process-wide class registry.
//!
//! Per-type metadata is computed once, on first registration, and cached
//! for the lifetime of the process: the registry is an append-only map
//! guarded by an insert-if-absent primitive, safe for concurrent lookups
//! while other threads register (sessions share nothing else).
//!
//! ## Compatibility fingerprint
//!
//! When a spec does not declare an explicit fingerprint, one is computed
//! from the type's structural signature: the qualified name, filtered
//! modifier bits, sorted interface names, fields sorted primitives-first
//! then by name, an optional static-initializer entry, and non-private
//! constructors and methods sorted by (name, signature). All of it is
//! encoded through the primitive codec (big-endian, length-prefixed
//! modified UTF), digested with SHA-1, and the first 8 digest bytes
//! accumulated little-endian into a `u64`. The computation is bit-exact
//! across processes; two descriptors whose fingerprints differ are
//! incompatible even when their names match.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::debug;
use sha1::{Digest, Sha1};

use crate::codec::{push_u32, push_utf};
use crate::descriptor::{ClassDescriptor, ClassSpec, FieldDesc, ReadHook, ReplaceFn, WriteHook};
use crate::error::{GravecError, Result};
use crate::value::{ElementKind, Instance};
use crate::wire::modifier;

/// A registered class: the immutable descriptor chain plus the vtable of
/// per-type capabilities (hooks and the constructor-bypassing allocator).
#[derive(Debug)]
pub struct RuntimeClass {
    descriptor: Arc<ClassDescriptor>,
    super_class: Option<Arc<RuntimeClass>>,
    write_hook: Option<WriteHook>,
    read_hook: Option<ReadHook>,
    write_replace: Option<ReplaceFn>,
    read_resolve: Option<ReplaceFn>,
}

impl RuntimeClass {
    /// Fully qualified class name.
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// The class's wire descriptor.
    pub fn descriptor(&self) -> &Arc<ClassDescriptor> {
        &self.descriptor
    }

    /// Nearest serializable ancestor, if any.
    pub fn super_class(&self) -> Option<&Arc<RuntimeClass>> {
        self.super_class.as_ref()
    }

    /// The inheritance chain, most-super level first. This is the order
    /// both engines walk field data in.
    pub fn chain(self: &Arc<Self>) -> Vec<Arc<RuntimeClass>> {
        let mut chain = Vec::new();
        let mut cur = Some(self.clone());
        while let Some(rc) = cur {
            cur = rc.super_class.clone();
            chain.push(rc);
        }
        chain.reverse();
        chain
    }

    /// Allocates a zeroed instance without running any user constructor.
    pub fn new_instance(self: &Arc<Self>) -> Instance {
        Instance::new(self)
    }

    /// True if the class fully owns its wire representation.
    pub fn is_external(&self) -> bool {
        self.descriptor.flags().is_external()
    }

    /// Custom write hook of this level, if declared.
    pub fn write_hook(&self) -> Option<WriteHook> {
        self.write_hook
    }

    /// Custom read hook of this level, if declared.
    pub fn read_hook(&self) -> Option<ReadHook> {
        self.read_hook
    }

    /// Write-replace hook, if declared.
    pub fn write_replace(&self) -> Option<ReplaceFn> {
        self.write_replace
    }

    /// Read-resolve hook, if declared.
    pub fn read_resolve(&self) -> Option<ReplaceFn> {
        self.read_resolve
    }
}

static CLASSES: OnceLock<Mutex<HashMap<String, Arc<RuntimeClass>>>> = OnceLock::new();

fn classes() -> std::sync::MutexGuard<'static, HashMap<String, Arc<RuntimeClass>>> {
    // The map is append-only, so a poisoned lock left by a panicking
    // thread still guards a consistent map.
    CLASSES
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Registers a class. If the name is already registered, the existing
/// entry is returned unchanged (insert-if-absent; descriptors are never
/// evicted or replaced during the process lifetime).
pub fn register(spec: ClassSpec) -> Result<Arc<RuntimeClass>> {
    let super_class = match &spec.super_name {
        Some(name) => Some(lookup(name).ok_or_else(|| {
            GravecError::ClassNotFound(format!(
                "superclass `{name}` of `{}` is not registered",
                spec.name
            ))
        })?),
        None => None,
    };

    let mut map = classes();
    if let Some(existing) = map.get(&spec.name) {
        return Ok(existing.clone());
    }
    let rc = build_class(&spec, super_class)?;
    debug!(
        "registered class `{}` fingerprint {:#018x}",
        rc.name(),
        rc.descriptor().fingerprint()
    );
    map.insert(spec.name.clone(), rc.clone());
    Ok(rc)
}

/// Looks up a registered class by name. Returns `None` for types that
/// never declared themselves serializable.
pub fn lookup(name: &str) -> Option<Arc<RuntimeClass>> {
    classes().get(name).cloned()
}

/// Resolves a wire class name to a local class: array classes are
/// synthesized on demand from their element signature, everything else
/// must have been registered.
pub fn resolve(name: &str) -> Result<Arc<RuntimeClass>> {
    if let Some(elem_sig) = name.strip_prefix('[') {
        return array_class(&ElementKind::from_signature(elem_sig)?);
    }
    lookup(name).ok_or_else(|| GravecError::ClassNotFound(format!("`{name}` is not registered")))
}

/// Returns (and caches) the synthetic class for arrays of `elem`.
pub fn array_class(elem: &ElementKind) -> Result<Arc<RuntimeClass>> {
    let name = elem.array_class_name();
    let mut map = classes();
    if let Some(existing) = map.get(&name) {
        return Ok(existing.clone());
    }
    let spec = ClassSpec::new(&name)
        .modifiers(modifier::PUBLIC | modifier::FINAL | modifier::ABSTRACT);
    let rc = build_class(&spec, None)?;
    map.insert(name, rc.clone());
    Ok(rc)
}

fn build_class(
    spec: &ClassSpec,
    super_class: Option<Arc<RuntimeClass>>,
) -> Result<Arc<RuntimeClass>> {
    let fingerprint = match spec.explicit_fingerprint {
        Some(fp) => fp,
        None => compute_fingerprint(spec)?,
    };
    let fields: Vec<FieldDesc> = spec.fields.iter().map(|f| f.desc.clone()).collect();
    let descriptor = ClassDescriptor::new(
        &spec.name,
        fingerprint,
        spec.class_flags(),
        fields,
        super_class.as_ref().map(|s| s.descriptor().clone()),
    );
    Ok(Arc::new(RuntimeClass {
        descriptor: Arc::new(descriptor),
        super_class,
        write_hook: spec.write_hook,
        read_hook: spec.read_hook,
        write_replace: spec.write_replace,
        read_resolve: spec.read_resolve,
    }))
}

/// Computes the structural compatibility fingerprint of a spec.
///
/// Bit-exact by construction: every input is encoded big-endian (UTF
/// entries carry their u16 byte-count prefix) in a fixed canonical
/// order before digesting.
pub fn compute_fingerprint(spec: &ClassSpec) -> Result<u64> {
    let mut buf = Vec::new();
    push_utf(&mut buf, &spec.name)?;
    push_u32(&mut buf, spec.modifiers & modifier::CLASS_FILTER);

    let mut interfaces = spec.interfaces.clone();
    interfaces.sort();
    for name in &interfaces {
        push_utf(&mut buf, name)?;
    }

    let mut fields: Vec<_> = spec.fields.iter().collect();
    fields.sort_by(|a, b| {
        b.desc
            .tag()
            .is_primitive()
            .cmp(&a.desc.tag().is_primitive())
            .then_with(|| a.desc.name().cmp(b.desc.name()))
    });
    for field in fields {
        push_utf(&mut buf, field.desc.name())?;
        push_u32(&mut buf, field.modifiers);
        push_utf(&mut buf, &field.desc.signature())?;
    }

    if spec.has_static_init {
        push_utf(&mut buf, "<clinit>")?;
        push_u32(&mut buf, modifier::STATIC);
        push_utf(&mut buf, "()V")?;
    }

    for members in [&spec.ctors, &spec.methods] {
        let mut visible: Vec<_> = members
            .iter()
            .filter(|m| m.modifiers & modifier::PRIVATE == 0)
            .collect();
        visible.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.signature.cmp(&b.signature)));
        for member in visible {
            push_utf(&mut buf, &member.name)?;
            push_u32(&mut buf, member.modifiers);
            push_utf(&mut buf, &member.signature.replace('/', "."))?;
        }
    }

    let digest = Sha1::digest(&buf);
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    Ok(u64::from_le_bytes(first))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let spec = ClassSpec::new("fp.Point").field_int("x").field_string("name");
        let a = compute_fingerprint(&spec).unwrap();
        let b = compute_fingerprint(&spec).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_tracks_structure() {
        let base = ClassSpec::new("fp.Node").field_int("x");
        let renamed = ClassSpec::new("fp.Node").field_int("y");
        let retyped = ClassSpec::new("fp.Node").field_long("x");
        let with_method = ClassSpec::new("fp.Node")
            .field_int("x")
            .method("touch", modifier::PUBLIC, "()V");
        let fp = compute_fingerprint(&base).unwrap();
        assert_ne!(fp, compute_fingerprint(&renamed).unwrap());
        assert_ne!(fp, compute_fingerprint(&retyped).unwrap());
        assert_ne!(fp, compute_fingerprint(&with_method).unwrap());
    }

    #[test]
    fn private_members_do_not_digest() {
        let public = ClassSpec::new("fp.Vis").field_int("x");
        let with_private = ClassSpec::new("fp.Vis")
            .field_int("x")
            .method("secret", modifier::PRIVATE, "()V");
        assert_eq!(
            compute_fingerprint(&public).unwrap(),
            compute_fingerprint(&with_private).unwrap()
        );
    }

    #[test]
    fn registration_is_insert_if_absent() {
        let first = register(ClassSpec::new("fp.Once").field_int("x")).unwrap();
        let second = register(ClassSpec::new("fp.Once").field_int("x").field_int("extra")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.descriptor().fields().len(), 1);
    }

    #[test]
    fn array_classes_are_synthesized_and_cached() {
        let a = array_class(&ElementKind::Int).unwrap();
        let b = resolve("[I").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "[I");
        assert!(a.descriptor().fields().is_empty());
    }

    #[test]
    fn superclass_must_exist() {
        let err = register(ClassSpec::new("fp.Orphan").extends("fp.NeverRegistered")).unwrap_err();
        assert!(matches!(err, GravecError::ClassNotFound(_)));
    }
}
