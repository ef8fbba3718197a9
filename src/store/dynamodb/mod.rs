use crate::SessionKey;
use crate::config::SessionConfig;
use crate::store::{Consistency, Error, SessionRecord, SessionStore};
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::client::Waiters;
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType, ReturnValue,
    ScalarAttributeType,
};
use std::collections::HashMap;
use std::time::Duration;

const DATA_ATTRIBUTE: &str = "data";
const CREATED_ATTRIBUTE: &str = "created";
const TABLE_CREATION_TIMEOUT: Duration = Duration::from_secs(60);

impl<E, R> From<SdkError<E, R>> for Error
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    fn from(err: SdkError<E, R>) -> Self {
        let message = DisplayErrorContext(&err).to_string();
        match err {
            SdkError::TimeoutError(_) => Error::Timeout(message),
            SdkError::DispatchFailure(failure) if failure.is_timeout() => Error::Timeout(message),
            _ => Error::Transport(message),
        }
    }
}

/// Writes an expiry timestamp next to each record so DynamoDB's own TTL
/// process can remove abandoned sessions. The attribute is never read back.
#[derive(Debug, Clone)]
struct Expiry {
    attribute: String,
    lifetime: Duration,
}

impl Expiry {
    fn value(&self, now: i64) -> AttributeValue {
        let lifetime = i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(lifetime);
        AttributeValue::N(expires_at.to_string())
    }
}

/// A builder for creating a [`DynamoStore`].
///
/// ```rust,no_run
/// use dynamo_sessions::store::dynamodb::DynamoStoreBuilder;
///
/// # async fn run() -> Result<(), dynamo_sessions::store::Error> {
/// let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
/// let client = aws_sdk_dynamodb::Client::new(&sdk_config);
///
/// let store = DynamoStoreBuilder::new(client)
///     .table_name("user_sessions")
///     .create_table(true)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DynamoStoreBuilder {
    client: Client,
    table_name: String,
    key_attribute: String,
    consistency: Consistency,
    expiry: Option<Expiry>,
    create_table: bool,
}

impl DynamoStoreBuilder {
    /// Creates a new builder around an existing client and default settings.
    ///
    /// Passing the client in lets callers manage credential refresh themselves.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            table_name: "sessions".to_string(),
            key_attribute: "session_key".to_string(),
            consistency: Consistency::Strong,
            expiry: None,
            create_table: false,
        }
    }

    /// Builds an SDK client from `config` and applies the store settings it carries.
    pub async fn from_config(config: &SessionConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = aws_sdk_dynamodb::config::Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "dynamo-sessions",
            );
            loader = loader.credentials_provider(credentials);
        }

        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        tracing::debug!(
            region = ?sdk_config.region(),
            table = %config.table_name,
            "dynamodb client configured"
        );

        let mut builder = Self::new(Client::new(&sdk_config))
            .table_name(config.table_name.clone())
            .key_attribute(config.key_attribute.clone())
            .consistency(config.consistency);

        if let Some(attribute) = &config.ttl_attribute {
            builder = builder.expire_with(
                attribute.clone(),
                Duration::from_secs(config.ttl_seconds),
            );
        }

        builder
    }

    /// Sets the table holding session records. Defaults to "sessions".
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Sets the partition key attribute name. Defaults to "session_key".
    pub fn key_attribute(mut self, key_attribute: impl Into<String>) -> Self {
        self.key_attribute = key_attribute.into();
        self
    }

    /// Sets the read consistency. Defaults to [`Consistency::Strong`].
    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// Writes `attribute` as unix seconds `lifetime` after every write.
    ///
    /// TTL must be enabled on the table for that attribute for records to be
    /// removed. The store itself never filters on it.
    pub fn expire_with(mut self, attribute: impl Into<String>, lifetime: Duration) -> Self {
        self.expiry = Some(Expiry {
            attribute: attribute.into(),
            lifetime,
        });
        self
    }

    /// Creates the table on build if it does not exist yet.
    pub fn create_table(mut self, create_table: bool) -> Self {
        self.create_table = create_table;
        self
    }

    /// Builds the `DynamoStore`, creating the table if requested.
    pub async fn build(self) -> Result<DynamoStore, Error> {
        if self.create_table {
            create_table(&self.client, &self.table_name, &self.key_attribute).await?;
        }

        Ok(DynamoStore {
            client: self.client,
            table_name: self.table_name,
            key_attribute: self.key_attribute,
            consistency: self.consistency,
            expiry: self.expiry,
        })
    }
}

#[tracing::instrument(name = "creating session table", skip(client))]
async fn create_table(client: &Client, table_name: &str, key_attribute: &str) -> Result<(), Error> {
    let key_schema = KeySchemaElement::builder()
        .attribute_name(key_attribute)
        .key_type(KeyType::Hash)
        .build()
        .map_err(|e| Error::Config(e.to_string()))?;

    let definition = AttributeDefinition::builder()
        .attribute_name(key_attribute)
        .attribute_type(ScalarAttributeType::S)
        .build()
        .map_err(|e| Error::Config(e.to_string()))?;

    let result = client
        .create_table()
        .table_name(table_name)
        .key_schema(key_schema)
        .attribute_definitions(definition)
        .billing_mode(BillingMode::PayPerRequest)
        .send()
        .await;

    match result {
        Ok(_) => {
            client
                .wait_until_table_exists()
                .table_name(table_name)
                .wait(TABLE_CREATION_TIMEOUT)
                .await
                .map_err(|e| Error::Config(DisplayErrorContext(&e).to_string()))?;
            tracing::info!(table = table_name, "created session table");
            Ok(())
        }
        Err(err)
            if err
                .as_service_error()
                .is_some_and(|e| e.is_resource_in_use_exception()) =>
        {
            tracing::debug!(table = table_name, "session table already exists");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// A DynamoDB-backed session store.
///
/// One item per session: the partition key holds the session key, `data` the
/// encoded session map as a binary attribute and `created` the creation time
/// in unix seconds. Inserts use `attribute_not_exists` on the partition key,
/// so two processes racing for the same key can never both succeed.
///
/// The client is cheap to clone and safe to share, so one store is meant to be
/// built at startup and shared across requests.
#[derive(Clone, Debug)]
pub struct DynamoStore {
    client: Client,
    table_name: String,
    key_attribute: String,
    consistency: Consistency,
    expiry: Option<Expiry>,
}

impl DynamoStore {
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    fn key_value(session_key: &SessionKey) -> AttributeValue {
        AttributeValue::S(session_key.to_string())
    }

    fn record_from_item(
        &self,
        session_key: &SessionKey,
        item: &HashMap<String, AttributeValue>,
    ) -> Result<SessionRecord, Error> {
        let data = match item.get(DATA_ATTRIBUTE) {
            Some(AttributeValue::B(blob)) => blob.as_ref().to_vec(),
            Some(_) => {
                return Err(Error::MalformedRecord(format!(
                    "`{DATA_ATTRIBUTE}` is not a binary attribute"
                )));
            }
            None => {
                return Err(Error::MalformedRecord(format!(
                    "missing `{DATA_ATTRIBUTE}`"
                )));
            }
        };

        let created = item
            .get(CREATED_ATTRIBUTE)
            .and_then(|value| value.as_n().ok())
            .ok_or_else(|| {
                Error::MalformedRecord(format!("missing numeric `{CREATED_ATTRIBUTE}`"))
            })?
            .parse::<i64>()
            .map_err(|e| Error::MalformedRecord(format!("`{CREATED_ATTRIBUTE}`: {e}")))?;

        Ok(SessionRecord::new(session_key.clone(), data, created))
    }
}

impl SessionStore for DynamoStore {
    #[tracing::instrument(name = "fetching session record", skip_all, fields(table = %self.table_name))]
    async fn get(&self, session_key: &SessionKey) -> Result<Option<SessionRecord>, Error> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(&self.key_attribute, Self::key_value(session_key))
            .consistent_read(self.consistency.is_strong())
            .send()
            .await?;

        output
            .item
            .map(|item| self.record_from_item(session_key, &item))
            .transpose()
    }

    #[tracing::instrument(name = "checking session record", skip_all, fields(table = %self.table_name))]
    async fn exists(&self, session_key: &SessionKey) -> Result<bool, Error> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(&self.key_attribute, Self::key_value(session_key))
            .projection_expression("#k")
            .expression_attribute_names("#k", &self.key_attribute)
            .consistent_read(self.consistency.is_strong())
            .send()
            .await?;

        Ok(output.item.is_some())
    }

    #[tracing::instrument(name = "inserting session record", skip_all, fields(table = %self.table_name))]
    async fn insert(&self, record: &SessionRecord) -> Result<(), Error> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item(&self.key_attribute, Self::key_value(&record.session_key))
            .item(DATA_ATTRIBUTE, AttributeValue::B(Blob::new(record.data.clone())))
            .item(
                CREATED_ATTRIBUTE,
                AttributeValue::N(record.created.to_string()),
            )
            .condition_expression("attribute_not_exists(#k)")
            .expression_attribute_names("#k", &self.key_attribute);

        if let Some(expiry) = &self.expiry {
            request = request.item(&expiry.attribute, expiry.value(record.created));
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                Err(Error::DuplicateKey)
            }
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(name = "updating session record", skip_all, fields(table = %self.table_name))]
    async fn update(
        &self,
        session_key: &SessionKey,
        data: &[u8],
        created: i64,
    ) -> Result<SessionRecord, Error> {
        let mut update_expression = String::from("SET #d = :d, #c = if_not_exists(#c, :c)");

        let mut request = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(&self.key_attribute, Self::key_value(session_key))
            .expression_attribute_names("#d", DATA_ATTRIBUTE)
            .expression_attribute_names("#c", CREATED_ATTRIBUTE)
            .expression_attribute_values(":d", AttributeValue::B(Blob::new(data.to_vec())))
            .expression_attribute_values(":c", AttributeValue::N(created.to_string()))
            .return_values(ReturnValue::AllNew);

        if let Some(expiry) = &self.expiry {
            update_expression.push_str(", #e = :e");
            request = request
                .expression_attribute_names("#e", &expiry.attribute)
                .expression_attribute_values(":e", expiry.value(super::now()));
        }

        let output = request.update_expression(update_expression).send().await?;

        let attributes = output.attributes.ok_or_else(|| {
            Error::MalformedRecord("update returned no attributes".to_string())
        })?;
        self.record_from_item(session_key, &attributes)
    }

    #[tracing::instrument(name = "deleting session record", skip_all, fields(table = %self.table_name))]
    async fn delete(&self, session_key: &SessionKey) -> Result<(), Error> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(&self.key_attribute, Self::key_value(session_key))
            .send()
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyGenerator;

    fn store() -> DynamoStore {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(aws_sdk_dynamodb::config::BehaviorVersion::latest())
            .region(aws_sdk_dynamodb::config::Region::new("us-east-1"))
            .build();

        DynamoStore {
            client: Client::from_conf(config),
            table_name: "sessions".into(),
            key_attribute: "session_key".into(),
            consistency: Consistency::Strong,
            expiry: None,
        }
    }

    #[test]
    fn parses_well_formed_item() {
        let store = store();
        let key = KeyGenerator::new("test").generate();
        let item = HashMap::from([
            ("session_key".to_string(), AttributeValue::S(key.to_string())),
            (
                DATA_ATTRIBUTE.to_string(),
                AttributeValue::B(Blob::new(vec![1, 2, 3])),
            ),
            (
                CREATED_ATTRIBUTE.to_string(),
                AttributeValue::N("1700000000".into()),
            ),
        ]);

        let record = store.record_from_item(&key, &item).unwrap();
        assert_eq!(record, SessionRecord::new(key, vec![1, 2, 3], 1_700_000_000));
    }

    #[test]
    fn rejects_mistyped_attributes() {
        let store = store();
        let key = KeyGenerator::new("test").generate();

        let string_data = HashMap::from([
            (DATA_ATTRIBUTE.to_string(), AttributeValue::S("abc".into())),
            (CREATED_ATTRIBUTE.to_string(), AttributeValue::N("1".into())),
        ]);
        assert!(matches!(
            store.record_from_item(&key, &string_data),
            Err(Error::MalformedRecord(_))
        ));

        let missing_created = HashMap::from([(
            DATA_ATTRIBUTE.to_string(),
            AttributeValue::B(Blob::new(Vec::new())),
        )]);
        assert!(matches!(
            store.record_from_item(&key, &missing_created),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn expiry_is_relative_to_write_time() {
        let expiry = Expiry {
            attribute: "expires_at".into(),
            lifetime: Duration::from_secs(60),
        };
        assert_eq!(expiry.value(1_000), AttributeValue::N("1060".into()));
    }

    #[test]
    fn connect_timeouts_are_timeouts() {
        use aws_smithy_runtime_api::client::result::ConnectorError;
        use std::io;

        let timed_out = SdkError::<io::Error, ()>::dispatch_failure(ConnectorError::timeout(
            Box::new(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        ));
        assert!(matches!(Error::from(timed_out), Error::Timeout(_)));

        let refused = SdkError::<io::Error, ()>::dispatch_failure(ConnectorError::io(Box::new(
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        )));
        assert!(matches!(Error::from(refused), Error::Transport(_)));

        let operation_timeout = SdkError::<io::Error, ()>::timeout_error(io::Error::new(
            io::ErrorKind::TimedOut,
            "operation timed out",
        ));
        assert!(matches!(Error::from(operation_timeout), Error::Timeout(_)));
    }

    #[test]
    fn huge_lifetime_saturates() {
        let expiry = Expiry {
            attribute: "expires_at".into(),
            lifetime: Duration::from_secs(u64::MAX),
        };
        assert_eq!(
            expiry.value(1_000),
            AttributeValue::N(i64::MAX.to_string())
        );
    }
}
