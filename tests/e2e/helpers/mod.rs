pub mod kafka_helper;

pub use kafka_helper::KafkaHelper;
