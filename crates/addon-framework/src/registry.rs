//! # Callback Registry
//!
//! Name → [`CallbackHandle`] map with a deprecated-alias table. Names are normalized at the
//! registry boundary: camelCase identifiers are decamelized (or rejected, depending on the
//! [`NamingPolicy`]) and reserved container names can never be taken by user callbacks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::callback::{CallbackDef, CallbackHandle, Handler, NativeCallback};
use crate::config::NamingPolicy;
use crate::constants::{is_reserved, Acl};
use crate::error::{AddonError, AddonResult};

/// Converts a camelCase/PascalCase identifier into snake_case.
///
/// `sayHello` → `say_hello`, `HTTPServer` → `http_server`, `getV2Data` → `get_v2_data`.
pub fn decamelize(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

fn is_snake_case(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Serializable view of one registered callback, as reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackDescriptor {
    #[serde(rename = "ACL")]
    pub acl: u8,
    pub alias: Vec<String>,
    pub executions: u64,
    pub failures: u64,
}

/// Result of resolving a name that may be an alias.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub handle: Arc<CallbackHandle>,
    /// Set when the name was a deprecated alias.
    pub alias: Option<String>,
}

#[derive(Debug)]
pub struct CallbackRegistry {
    callbacks: HashMap<String, Arc<CallbackHandle>>,
    aliases: HashMap<String, String>,
    last_registered: Option<String>,
    policy: NamingPolicy,
}

impl CallbackRegistry {
    /// Creates a registry already holding the native callbacks.
    pub fn new(policy: NamingPolicy) -> Self {
        let callbacks = NativeCallback::ALL
            .into_iter()
            .map(|native| (native.name().to_string(), Arc::new(CallbackHandle::native(native))))
            .collect();
        Self {
            callbacks,
            aliases: HashMap::new(),
            last_registered: None,
            policy,
        }
    }

    fn normalize(&self, name: &str) -> AddonResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AddonError::InvalidArgument(
                "callback name must not be empty".into(),
            ));
        }
        let normalized = match self.policy {
            NamingPolicy::Decamelize => decamelize(name),
            NamingPolicy::Reject => name.to_string(),
        };
        if !is_snake_case(&normalized) {
            return Err(AddonError::InvalidArgument(format!(
                "callback name '{name}' should be formated in snake_case"
            )));
        }
        Ok(normalized)
    }

    /// Registers (or overwrites) a user callback and returns its normalized name.
    pub fn register(&mut self, def: CallbackDef) -> AddonResult<String> {
        let name = self.normalize(&def.name)?;
        if is_reserved(&name) {
            return Err(AddonError::ReservedName(name));
        }
        let handle = CallbackHandle::new(name.clone(), Handler::User(def.handler), def.acl);
        self.callbacks.insert(name.clone(), Arc::new(handle));
        self.last_registered = Some(name.clone());
        Ok(name)
    }

    pub fn set_acl(&mut self, name: &str, acl: Acl) -> AddonResult<()> {
        let handle = self
            .callbacks
            .get(name)
            .ok_or_else(|| AddonError::NotFound(name.to_string()))?;
        handle.set_acl(acl);
        Ok(())
    }

    pub fn set_deprecated_alias<I, S>(&mut self, name: &str, aliases: I) -> AddonResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.callbacks.contains_key(name) {
            return Err(AddonError::NotFound(name.to_string()));
        }
        for alias in aliases {
            let alias = alias.into();
            if is_reserved(&alias) {
                return Err(AddonError::ReservedName(alias));
            }
            self.aliases.insert(alias, name.to_string());
        }
        Ok(())
    }

    /// Resolves `name` directly, then through the alias table.
    pub fn resolve(&self, name: &str) -> AddonResult<Resolved> {
        if let Some(handle) = self.callbacks.get(name) {
            return Ok(Resolved {
                handle: handle.clone(),
                alias: None,
            });
        }
        self.aliases
            .get(name)
            .and_then(|canonical| self.callbacks.get(canonical))
            .map(|handle| Resolved {
                handle: handle.clone(),
                alias: Some(name.to_string()),
            })
            .ok_or_else(|| AddonError::CallbackNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    /// Most recently registered user callback.
    pub fn last_registered(&self) -> Option<&str> {
        self.last_registered.as_deref()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn descriptors(&self) -> BTreeMap<String, CallbackDescriptor> {
        self.callbacks
            .iter()
            .map(|(name, handle)| {
                let mut alias: Vec<String> = self
                    .aliases
                    .iter()
                    .filter(|(_, canonical)| *canonical == name)
                    .map(|(alias, _)| alias.clone())
                    .collect();
                alias.sort();
                let descriptor = CallbackDescriptor {
                    acl: handle.acl().level(),
                    alias,
                    executions: handle.executions(),
                    failures: handle.failures(),
                };
                (name.clone(), descriptor)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallContext;
    use crate::constants::RESERVED_CALLBACK_NAMES;
    use serde_json::{json, Value};

    fn def(name: &str) -> CallbackDef {
        CallbackDef::new(name, |_ctx: CallContext, _args: Vec<Value>| async {
            Ok(json!(null))
        })
    }

    #[test]
    fn test_decamelize() {
        assert_eq!(decamelize("sayHello"), "say_hello");
        assert_eq!(decamelize("getWorld"), "get_world");
        assert_eq!(decamelize("HTTPServer"), "http_server");
        assert_eq!(decamelize("getV2Data"), "get_v2_data");
        assert_eq!(decamelize("already_snake"), "already_snake");
    }

    #[test]
    fn test_native_callbacks_are_present() {
        let registry = CallbackRegistry::new(NamingPolicy::Decamelize);
        assert_eq!(registry.len(), RESERVED_CALLBACK_NAMES.len());
        for name in RESERVED_CALLBACK_NAMES {
            assert!(registry.contains(name));
        }
        assert_eq!(registry.last_registered(), None);
    }

    #[test]
    fn test_reserved_names_are_refused() {
        let mut registry = CallbackRegistry::new(NamingPolicy::Decamelize);
        for name in RESERVED_CALLBACK_NAMES {
            let err = registry.register(def(name)).unwrap_err();
            assert!(matches!(err, AddonError::ReservedName(_)));
        }
        // Decamelized before the reserved check.
        let err = registry.register(def("healthCheck")).unwrap_err();
        assert!(matches!(err, AddonError::ReservedName(n) if n == "health_check"));
    }

    #[test]
    fn test_naming_policies() {
        let mut registry = CallbackRegistry::new(NamingPolicy::Decamelize);
        assert_eq!(registry.register(def("getWorld")).unwrap(), "get_world");
        assert!(registry.contains("get_world"));

        let mut strict = CallbackRegistry::new(NamingPolicy::Reject);
        let err = strict.register(def("getWorld")).unwrap_err();
        assert!(matches!(err, AddonError::InvalidArgument(_)));
        assert!(strict.register(def("get_world")).is_ok());

        assert!(registry.register(def("  ")).is_err());
        assert!(registry.register(def("bad-name")).is_err());
    }

    #[test]
    fn test_aliases_and_acl() {
        let mut registry = CallbackRegistry::new(NamingPolicy::Decamelize);
        registry.register(def("foo")).unwrap();

        let err = registry.set_deprecated_alias("bar", ["bar_old"]).unwrap_err();
        assert!(matches!(err, AddonError::NotFound(_)));

        registry
            .set_deprecated_alias("foo", ["foo_v1", "foo_old"])
            .unwrap();
        let resolved = registry.resolve("foo_old").unwrap();
        assert_eq!(resolved.handle.name(), "foo");
        assert_eq!(resolved.alias.as_deref(), Some("foo_old"));
        assert!(registry.resolve("foo").unwrap().alias.is_none());
        assert!(matches!(
            registry.resolve("nope"),
            Err(AddonError::CallbackNotFound(_))
        ));

        registry.set_acl("foo", Acl::Admin).unwrap();
        assert!(matches!(
            registry.set_acl("nope", Acl::Admin),
            Err(AddonError::NotFound(_))
        ));

        let descriptors = registry.descriptors();
        let foo = &descriptors["foo"];
        assert_eq!(foo.acl, 2);
        assert_eq!(foo.alias, vec!["foo_old".to_string(), "foo_v1".to_string()]);
        assert!(!descriptors.contains_key("foo_old"));
    }

    #[test]
    fn test_register_overwrites_and_tracks_last() {
        let mut registry = CallbackRegistry::new(NamingPolicy::Decamelize);
        registry.register(def("first").acl(Acl::Write)).unwrap();
        registry.register(def("second")).unwrap();
        registry.register(def("first")).unwrap();
        assert_eq!(registry.last_registered(), Some("first"));
        assert_eq!(registry.resolve("first").unwrap().handle.acl(), Acl::Read);
    }
}
