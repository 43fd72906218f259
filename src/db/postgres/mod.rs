mod metadata;

pub use metadata::PostgresMetadataStore;
