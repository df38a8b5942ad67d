//! The Class Registry - names to handles, resolved once at join.
//!
//! The RTI identifies every interaction class, parameter, object class and
//! attribute by an opaque handle that is only valid inside one federation
//! execution. The registry asks for each declared name exactly once, right
//! after join, and serves every later lookup from its own tables.
//!
//! A name the federation does not know is a FOM mismatch. That cannot heal
//! by retrying, so resolution stops at the first missing name.

use fedbridge_env::{
    AttributeHandle, InteractionClassHandle, ObjectClassHandle, ParameterHandle, RtiAmbassador,
};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::BridgeError;

/// Interaction class and parameter names of the control protocol.
pub mod names {
    /// Request to load a scenario on the federate it names
    pub const SCENARIO_LOAD: &str = "ScenarioLoad";
    /// Start an already loaded scenario
    pub const SCENARIO_START: &str = "ScenarioStart";
    /// Pause a running scenario
    pub const SCENARIO_PAUSE: &str = "ScenarioPause";
    /// Stop a running scenario
    pub const SCENARIO_STOP: &str = "ScenarioStop";
    /// Success outcome of a load
    pub const SCENARIO_LOADED: &str = "ScenarioLoaded";
    /// Failure outcome of a load
    pub const SCENARIO_ERROR: &str = "ScenarioError";

    /// Scenario name parameter of the command interactions
    pub const SC_NAME: &str = "ScName";
    /// Reporting federate parameter of the outcome interactions
    pub const FEDERATE_NAME: &str = "FederateName";
    /// Failure description parameter of `ScenarioError`
    pub const DETAIL: &str = "Detail";
}

/// Names that must be resolved at join time.
#[derive(Debug, Clone, Default)]
pub struct ClassManifest {
    interactions: Vec<(String, Vec<String>)>,
    objects: Vec<(String, Vec<String>)>,
}

impl ClassManifest {
    /// Creates an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Manifest of the scenario control protocol.
    pub fn control() -> Self {
        use names::*;
        Self::new()
            .interaction(SCENARIO_LOAD, &[SC_NAME])
            .interaction(SCENARIO_START, &[SC_NAME])
            .interaction(SCENARIO_PAUSE, &[SC_NAME])
            .interaction(SCENARIO_STOP, &[SC_NAME])
            .interaction(SCENARIO_LOADED, &[FEDERATE_NAME])
            .interaction(SCENARIO_ERROR, &[FEDERATE_NAME, DETAIL])
    }

    /// Declares an interaction class with its parameters.
    pub fn interaction(mut self, class: &str, parameters: &[&str]) -> Self {
        self.interactions.push((
            class.to_string(),
            parameters.iter().map(|p| p.to_string()).collect(),
        ));
        self
    }

    /// Declares an object class with its attributes.
    pub fn object(mut self, class: &str, attributes: &[&str]) -> Self {
        self.objects.push((
            class.to_string(),
            attributes.iter().map(|a| a.to_string()).collect(),
        ));
        self
    }

    /// Declared interaction classes and their parameter names.
    pub fn interactions(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.interactions.iter().map(|(c, p)| (c, p))
    }

    /// Declared object classes and their attribute names.
    pub fn objects(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.objects.iter().map(|(c, a)| (c, a))
    }

    /// Merges another manifest's declarations into this one.
    pub fn extend(mut self, other: ClassManifest) -> Self {
        self.interactions.extend(other.interactions);
        self.objects.extend(other.objects);
        self
    }
}

#[derive(Debug, Clone)]
struct InteractionEntry {
    name: String,
    parameters: HashMap<String, ParameterHandle>,
    parameter_names: HashMap<ParameterHandle, String>,
}

#[derive(Debug, Clone)]
struct ObjectEntry {
    attributes: HashMap<String, AttributeHandle>,
}

/// Resolved, read-only handle tables.
///
/// Built by [`ClassRegistry::resolve`] and never mutated afterwards, so it
/// is shared behind an `Arc` without locking.
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    interactions_by_name: HashMap<String, InteractionClassHandle>,
    interactions: HashMap<InteractionClassHandle, InteractionEntry>,
    objects_by_name: HashMap<String, ObjectClassHandle>,
    objects: HashMap<ObjectClassHandle, ObjectEntry>,
}

impl ClassRegistry {
    /// Resolves every name in `manifest` against the joined federation.
    ///
    /// Each name is requested from the RTI exactly once. The first missing
    /// name aborts resolution with a fatal [`BridgeError::Resolve`].
    pub async fn resolve<Rti: RtiAmbassador + ?Sized>(
        rti: &Rti,
        manifest: &ClassManifest,
    ) -> Result<Self, BridgeError> {
        let mut interactions_by_name = HashMap::new();
        let mut interactions = HashMap::new();

        for (class_name, params) in manifest.interactions() {
            if interactions_by_name.contains_key(class_name) {
                continue;
            }
            let class = rti
                .get_interaction_class_handle(class_name)
                .await
                .map_err(|source| BridgeError::Resolve {
                    kind: "interaction class",
                    name: class_name.clone(),
                    source,
                })?;

            let mut parameters = HashMap::new();
            let mut parameter_names = HashMap::new();
            for param in params {
                let handle = rti.get_parameter_handle(class, param).await.map_err(|source| {
                    BridgeError::Resolve {
                        kind: "parameter",
                        name: format!("{class_name}.{param}"),
                        source,
                    }
                })?;
                parameters.insert(param.clone(), handle);
                parameter_names.insert(handle, param.clone());
            }

            debug!(class = %class_name, handle = %class, params = params.len(), "Resolved interaction class");
            interactions_by_name.insert(class_name.clone(), class);
            interactions.insert(
                class,
                InteractionEntry {
                    name: class_name.clone(),
                    parameters,
                    parameter_names,
                },
            );
        }

        let mut objects_by_name = HashMap::new();
        let mut objects = HashMap::new();

        for (class_name, attrs) in manifest.objects() {
            if objects_by_name.contains_key(class_name) {
                continue;
            }
            let class = rti
                .get_object_class_handle(class_name)
                .await
                .map_err(|source| BridgeError::Resolve {
                    kind: "object class",
                    name: class_name.clone(),
                    source,
                })?;

            let mut attributes = HashMap::new();
            for attr in attrs {
                let handle = rti.get_attribute_handle(class, attr).await.map_err(|source| {
                    BridgeError::Resolve {
                        kind: "attribute",
                        name: format!("{class_name}.{attr}"),
                        source,
                    }
                })?;
                attributes.insert(attr.clone(), handle);
            }

            objects_by_name.insert(class_name.clone(), class);
            objects.insert(class, ObjectEntry { attributes });
        }

        info!(
            interactions = interactions.len(),
            objects = objects.len(),
            "Class registry resolved"
        );

        Ok(Self {
            interactions_by_name,
            interactions,
            objects_by_name,
            objects,
        })
    }

    /// Returns the handle of a declared interaction class.
    pub fn interaction(&self, name: &str) -> Result<InteractionClassHandle, BridgeError> {
        self.interactions_by_name
            .get(name)
            .copied()
            .ok_or_else(|| BridgeError::UnknownName(name.to_string()))
    }

    /// Returns the handle of a declared parameter.
    pub fn parameter(
        &self,
        class: InteractionClassHandle,
        name: &str,
    ) -> Result<ParameterHandle, BridgeError> {
        self.interactions
            .get(&class)
            .and_then(|entry| entry.parameters.get(name))
            .copied()
            .ok_or_else(|| BridgeError::UnknownName(format!("{class}.{name}")))
    }

    /// Returns the handle of a declared object class.
    pub fn object_class(&self, name: &str) -> Result<ObjectClassHandle, BridgeError> {
        self.objects_by_name
            .get(name)
            .copied()
            .ok_or_else(|| BridgeError::UnknownName(name.to_string()))
    }

    /// Returns the handle of a declared attribute.
    pub fn attribute(
        &self,
        class: ObjectClassHandle,
        name: &str,
    ) -> Result<AttributeHandle, BridgeError> {
        self.objects
            .get(&class)
            .and_then(|entry| entry.attributes.get(name))
            .copied()
            .ok_or_else(|| BridgeError::UnknownName(format!("{class}.{name}")))
    }

    /// Reverse lookup of an interaction class name.
    pub fn interaction_name(&self, class: InteractionClassHandle) -> Option<&str> {
        self.interactions.get(&class).map(|e| e.name.as_str())
    }

    /// Names of the parameters declared for an interaction class.
    pub fn declared_parameters(
        &self,
        class: InteractionClassHandle,
    ) -> impl Iterator<Item = &str> + '_ {
        self.interactions
            .get(&class)
            .into_iter()
            .flat_map(|e| e.parameters.keys().map(String::as_str))
    }

    /// Reverse lookup of a parameter name.
    pub fn parameter_name(
        &self,
        class: InteractionClassHandle,
        parameter: ParameterHandle,
    ) -> Option<&str> {
        self.interactions
            .get(&class)
            .and_then(|e| e.parameter_names.get(&parameter))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRti;
    use proptest::prelude::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_resolve_control_manifest() {
        let manifest = ClassManifest::control();
        let rti = ScriptedRti::with_manifest(&manifest);
        let registry = ClassRegistry::resolve(rti.as_ref(), &manifest).await.unwrap();

        let load = registry.interaction(names::SCENARIO_LOAD).unwrap();
        assert_eq!(load, rti.interaction_handle(names::SCENARIO_LOAD));
        let sc_name = registry.parameter(load, names::SC_NAME).unwrap();
        assert_eq!(registry.interaction_name(load), Some(names::SCENARIO_LOAD));
        assert_eq!(registry.parameter_name(load, sc_name), Some(names::SC_NAME));
    }

    #[tokio::test]
    async fn test_lookups_never_recontact_bus() {
        let manifest = ClassManifest::control().object("Platform", &["Position", "Callsign"]);
        let rti = ScriptedRti::with_manifest(&manifest);
        let registry = ClassRegistry::resolve(rti.as_ref(), &manifest).await.unwrap();
        let calls_after_join = rti.lookups.load(Ordering::SeqCst);

        for _ in 0..10 {
            let error = registry.interaction(names::SCENARIO_ERROR).unwrap();
            registry.parameter(error, names::DETAIL).unwrap();
            let platform = registry.object_class("Platform").unwrap();
            registry.attribute(platform, "Callsign").unwrap();
        }

        assert_eq!(rti.lookups.load(Ordering::SeqCst), calls_after_join);
    }

    #[tokio::test]
    async fn test_missing_class_is_fatal() {
        let manifest = ClassManifest::control();
        let rti = ScriptedRti::with_manifest(&manifest);
        rti.forget_interaction(names::SCENARIO_STOP);

        let err = ClassRegistry::resolve(rti.as_ref(), &manifest)
            .await
            .unwrap_err();
        assert!(err.is_fatal_startup());
        assert!(matches!(
            err,
            BridgeError::Resolve { ref name, .. } if name == names::SCENARIO_STOP
        ));
    }

    #[tokio::test]
    async fn test_undeclared_name_is_unknown() {
        let manifest = ClassManifest::control();
        let rti = ScriptedRti::with_manifest(&manifest);
        let registry = ClassRegistry::resolve(rti.as_ref(), &manifest).await.unwrap();

        assert!(matches!(
            registry.interaction("WeatherUpdate"),
            Err(BridgeError::UnknownName(_))
        ));
        let load = registry.interaction(names::SCENARIO_LOAD).unwrap();
        assert!(registry.parameter(load, names::DETAIL).is_err());
    }

    proptest! {
        #[test]
        fn prop_resolution_is_idempotent(
            classes in proptest::collection::btree_map(
                "[A-Z][a-zA-Z]{2,8}",
                proptest::collection::btree_set("[a-z][a-zA-Z]{1,6}", 0..4),
                1..6,
            )
        ) {
            let mut manifest = ClassManifest::new();
            for (class, params) in &classes {
                let params: Vec<&str> = params.iter().map(String::as_str).collect();
                manifest = manifest.interaction(class, &params);
            }

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let rti = ScriptedRti::with_manifest(&manifest);
            let registry = rt
                .block_on(ClassRegistry::resolve(rti.as_ref(), &manifest))
                .unwrap();

            for (class, params) in &classes {
                let first = registry.interaction(class).unwrap();
                prop_assert_eq!(first, rti.interaction_handle(class));
                for _ in 0..3 {
                    prop_assert_eq!(registry.interaction(class).unwrap(), first);
                    for param in params {
                        prop_assert_eq!(
                            registry.parameter(first, param).unwrap(),
                            rti.parameter_handle(class, param)
                        );
                    }
                }
            }
        }
    }
}
