mod metadata;

pub use metadata::SqliteMetadataStore;
