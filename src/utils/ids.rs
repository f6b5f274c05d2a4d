use uuid::Uuid;

/// New correlation id for a message that has not reached the server yet.
pub fn new_temp_id() -> String {
    format!("temp-{}", Uuid::new_v4())
}

/// STOMP subscription id, unique per connection.
pub fn new_subscription_id() -> String {
    format!("sub-{}", Uuid::new_v4().simple())
}
