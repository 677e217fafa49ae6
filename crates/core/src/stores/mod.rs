pub mod memory;
pub mod neo4j;

pub use memory::InMemoryStore;
pub use neo4j::Neo4jStore;
