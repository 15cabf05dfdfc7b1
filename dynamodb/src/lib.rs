//! DynamoDB source: tables are read through the DynamoDB API and changes through DynamoDB Streams,
//! both with the AWS SDK and credentials from the standard provider chain.

mod client;
mod convert;
mod error;

pub use client::DynamoDbSource;
