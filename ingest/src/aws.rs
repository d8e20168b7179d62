use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Shared SDK configuration for the S3, SQS and Secrets Manager clients.
/// Credentials come from the default provider chain.
pub async fn load_sdk_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}
