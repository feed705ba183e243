use super::{Store, StoreConfig};
use crate::adapter::{Adapter, AdapterRegistry};
use crate::core::{Result, StoreError};
use crate::payload::{Serializer, SerializerRegistry};
use crate::schema::{ModelSchema, SchemaRegistry};
use std::sync::Arc;

/// Assembles a [`Store`].
///
/// ```
/// use memostore::{ModelSchema, Store, StoreConfig};
///
/// let store = Store::builder()
///     .model(ModelSchema::new("post").attr("title").has_many("comments", "comment"))
///     .model(ModelSchema::new("comment").attr("body").belongs_to("post", "post"))
///     .config(StoreConfig::new("blog"))
///     .build()
///     .unwrap();
/// assert_eq!(store.label(), "blog");
/// ```
#[derive(Default)]
pub struct StoreBuilder {
    models: Vec<ModelSchema>,
    adapters: AdapterRegistry,
    serializers: SerializerRegistry,
    config: StoreConfig,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: ModelSchema) -> Self {
        self.models.push(model);
        self
    }

    pub fn models(mut self, models: impl IntoIterator<Item = ModelSchema>) -> Self {
        self.models.extend(models);
        self
    }

    /// Set the adapter used for every model without one of its own
    pub fn adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.set_default(adapter);
        self
    }

    pub fn adapter_for(mut self, model: &str, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.register(model, adapter);
        self
    }

    /// Replace the default [`JsonApiSerializer`](crate::payload::JsonApiSerializer)
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializers.set_default(serializer);
        self
    }

    pub fn serializer_for(mut self, model: &str, serializer: Arc<dyn Serializer>) -> Self {
        self.serializers.register(model, serializer);
        self
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the schema and create the store
    pub fn build(self) -> Result<Store> {
        let schema = SchemaRegistry::new(self.models)?;
        if let Some(unknown) = self
            .adapters
            .registered_models()
            .find(|model| !schema.contains(model))
        {
            return Err(StoreError::Schema(format!(
                "An adapter was registered for unknown model '{}'",
                unknown
            )));
        }
        if let Some(unknown) = self
            .serializers
            .registered_models()
            .find(|model| !schema.contains(model))
        {
            return Err(StoreError::Schema(format!(
                "A serializer was registered for unknown model '{}'",
                unknown
            )));
        }

        log::debug!(
            "building store '{}' with {} models",
            self.config.label,
            schema.model_names().count()
        );
        Ok(Store::new(self.config, schema, self.adapters, self.serializers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::JsonApiSerializer;

    #[test]
    fn test_build_validates_schema() {
        let err = StoreBuilder::new()
            .model(ModelSchema::new("comment").belongs_to("post", "post"))
            .build()
            .unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn test_serializer_for_unknown_model() {
        let err = StoreBuilder::new()
            .model(ModelSchema::new("post"))
            .serializer_for("comment", Arc::new(JsonApiSerializer))
            .build()
            .unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn test_store_without_adapter_is_usable_offline() {
        let store = StoreBuilder::new()
            .model(ModelSchema::new("post").attr("title"))
            .build()
            .unwrap();
        assert_eq!(store.label(), "store");
        assert!(store.adapter_for("post").is_err());
        assert!(store.create_record("post", serde_json::json!({"title": "draft"})).is_ok());
    }
}
