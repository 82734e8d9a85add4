//! Named registry of [`Engine`]s, addressed by served model name
//! (`SPEC_FULL.md` §4.4).
use crate::config::EngineArgs;
use crate::embedder::EmbeddingInput;
use crate::{EmbedOutput, Engine, Error};

/// Insertion-ordered collection of engines, one per configured model.
///
/// Construction rejects duplicate served names up front; `start_all` and
/// `stop_all` walk the collection in, respectively, insertion and reverse
/// order so teardown unwinds startup symmetrically.
pub struct EngineArray {
    engines: Vec<Engine>,
}

impl EngineArray {
    /// Builds an array from a list of validated engine arguments. Fails if
    /// the list is empty or if two entries resolve to the same served name.
    pub fn new(args: Vec<EngineArgs>) -> Result<Self, Error> {
        if args.is_empty() {
            return Err(Error::Config("engine array must have at least one model".into()));
        }
        let mut engines = Vec::with_capacity(args.len());
        for a in args {
            let engine = Engine::new(a)?;
            if engines
                .iter()
                .any(|e: &Engine| e.served_name() == engine.served_name())
            {
                return Err(Error::Config(format!(
                    "duplicate served_model_name '{}'",
                    engine.served_name()
                )));
            }
            engines.push(engine);
        }
        Ok(Self { engines })
    }

    /// The served names of every engine in this array, in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.engines.iter().map(Engine::served_name).collect()
    }

    /// Number of engines in this array.
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// True when this array has no engines.
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Starts every engine in insertion order. Stops whatever was already
    /// started and returns the first error if any engine fails to start.
    pub async fn start_all(&self) -> Result<(), Error> {
        for (i, engine) in self.engines.iter().enumerate() {
            if let Err(e) = engine.start().await {
                for started in self.engines[..i].iter().rev() {
                    let _ = started.stop().await;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stops every engine in reverse insertion order. Collects and reports
    /// only the first error encountered; every engine is still given a
    /// chance to stop regardless of earlier failures.
    pub async fn stop_all(&self) -> Result<(), Error> {
        let mut first_error = None;
        for engine in self.engines.iter().rev() {
            if let Err(e) = engine.stop().await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Looks up an engine by served name. When the array holds exactly one
    /// engine, any name resolves to it (`SPEC_FULL.md` §3/§4.4's
    /// single-model convenience) — the mismatch only becomes a
    /// `ModelNotFound` once there is more than one engine to disambiguate.
    pub fn get(&self, name: &str) -> Result<&Engine, Error> {
        if let Some(engine) = self.engines.iter().find(|e| e.served_name() == name) {
            return Ok(engine);
        }
        self.only().map_err(|_| Error::ModelNotFound {
            requested: name.to_string(),
            available: self.names().into_iter().map(str::to_string).collect(),
        })
    }

    /// Looks up an engine by its position in insertion order
    /// (`SPEC_FULL.md` §4.4's "lookup by index is defined against insertion
    /// order"). Falls back the same way `get` does when exactly one engine
    /// is configured.
    pub fn get_by_index(&self, index: usize) -> Result<&Engine, Error> {
        if let Some(engine) = self.engines.get(index) {
            return Ok(engine);
        }
        self.only().map_err(|_| Error::ModelNotFound {
            requested: index.to_string(),
            available: self.names().into_iter().map(str::to_string).collect(),
        })
    }

    /// Convenience resolution for single-model deployments: returns the
    /// sole engine when exactly one is configured, regardless of name.
    pub fn only(&self) -> Result<&Engine, Error> {
        match self.engines.as_slice() {
            [engine] => Ok(engine),
            _ => Err(Error::Config(
                "engine array has more than one model; a name must be given".into(),
            )),
        }
    }

    /// Resolves `key` as a served name first, then — when that misses and
    /// the array holds more than one engine — as a stringified index into
    /// insertion order. Implements `SPEC_FULL.md` §4.4's unified
    /// `lookup(name | index)`.
    pub fn lookup(&self, key: &str) -> Result<&Engine, Error> {
        match self.get(key) {
            Ok(engine) => Ok(engine),
            Err(by_name_err) => match key.parse::<usize>() {
                Ok(index) => self.get_by_index(index),
                Err(_) => Err(by_name_err),
            },
        }
    }

    /// Submits to the engine resolved by `lookup(name)`: a served name, or
    /// (for multi-engine arrays) a stringified insertion-order index.
    pub async fn submit(&self, name: &str, input: EmbeddingInput) -> Result<EmbedOutput, Error> {
        self.lookup(name)?.submit(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_served_names() {
        let args = vec![EngineArgs::new("a"), EngineArgs::new("a")];
        assert!(matches!(EngineArray::new(args), Err(Error::Config(_))));
    }

    #[test]
    fn distinct_served_names_construct_fine() {
        let mut second = EngineArgs::new("b");
        second.served_model_name = Some("second".into());
        let args = vec![EngineArgs::new("a"), second];
        let array = EngineArray::new(args).expect("no duplicates");
        assert_eq!(array.len(), 2);
        assert_eq!(array.names(), vec!["a", "second"]);
    }

    #[test]
    fn single_engine_get_falls_back_regardless_of_name() {
        let array = EngineArray::new(vec![EngineArgs::new("a")]).expect("valid");
        let engine = array.get("anything-at-all").expect("single-engine fallback");
        assert_eq!(engine.served_name(), "a");
    }

    #[test]
    fn single_engine_get_by_index_falls_back_regardless_of_index() {
        let array = EngineArray::new(vec![EngineArgs::new("a")]).expect("valid");
        let engine = array.get_by_index(41).expect("single-engine fallback");
        assert_eq!(engine.served_name(), "a");
    }

    #[test]
    fn multi_engine_get_unknown_name_lists_available() {
        let mut second = EngineArgs::new("b");
        second.served_model_name = Some("second".into());
        let array = EngineArray::new(vec![EngineArgs::new("a"), second]).expect("valid");
        match array.get("missing") {
            Err(Error::ModelNotFound { requested, available }) => {
                assert_eq!(requested, "missing");
                assert_eq!(available, vec!["a".to_string(), "second".to_string()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn multi_engine_get_by_index_resolves_insertion_order() {
        let mut second = EngineArgs::new("b");
        second.served_model_name = Some("second".into());
        let array = EngineArray::new(vec![EngineArgs::new("a"), second]).expect("valid");
        assert_eq!(array.get_by_index(0).expect("in range").served_name(), "a");
        assert_eq!(array.get_by_index(1).expect("in range").served_name(), "second");

        match array.get_by_index(2) {
            Err(Error::ModelNotFound { requested, .. }) => assert_eq!(requested, "2"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn lookup_resolves_by_name_or_stringified_index() {
        let mut second = EngineArgs::new("b");
        second.served_model_name = Some("second".into());
        let array = EngineArray::new(vec![EngineArgs::new("a"), second]).expect("valid");

        assert_eq!(array.lookup("second").expect("by name").served_name(), "second");
        assert_eq!(array.lookup("1").expect("by index").served_name(), "second");
        assert!(matches!(array.lookup("missing"), Err(Error::ModelNotFound { .. })));
    }

    #[test]
    fn only_requires_exactly_one_engine() {
        let single = EngineArray::new(vec![EngineArgs::new("a")]).expect("valid");
        assert!(single.only().is_ok());

        let mut second = EngineArgs::new("b");
        second.served_model_name = Some("second".into());
        let multi = EngineArray::new(vec![EngineArgs::new("a"), second]).expect("valid");
        assert!(matches!(multi.only(), Err(Error::Config(_))));
    }

    #[test]
    fn empty_array_is_rejected() {
        assert!(matches!(EngineArray::new(vec![]), Err(Error::Config(_))));
    }
}
