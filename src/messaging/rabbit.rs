//! RabbitMQ implementation of the broker port, backed by `lapin`.
//!
//! The connection/channel pair is an explicitly owned handle created at
//! startup and shared by the initiator and worker; there is no ambient
//! global broker state.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::Mutex;

use crate::ports::{
    BrokerError, BrokerPort, BrokerResult, DeliveryStream, Disposition, InboundMessage,
    MessageSettler,
};

use super::topology::TopologyConfig;

const REPLY_SUCCESS: u16 = 200;

/// Broker handle over a single AMQP connection and channel.
pub struct RabbitBroker {
    url: String,
    topology: TopologyConfig,
    state: Mutex<Option<Open>>,
}

struct Open {
    connection: Connection,
    channel: Channel,
}

impl RabbitBroker {
    pub fn new(url: String, topology: TopologyConfig) -> Self {
        Self {
            url,
            topology,
            state: Mutex::new(None),
        }
    }

    async fn channel(&self) -> BrokerResult<Channel> {
        let guard = self.state.lock().await;
        guard
            .as_ref()
            .map(|open| open.channel.clone())
            .ok_or(BrokerError::NotConnected)
    }

    /// Declare the exchange, the queue (with an optional dead-letter
    /// exchange argument), and the binding. All three declares are
    /// idempotent for identical parameters; conflicting parameters surface
    /// as a protocol error for the caller to treat as fatal configuration.
    pub async fn declare_topology(&self) -> BrokerResult<()> {
        let cfg = &self.topology;
        let channel = self.channel().await?;

        channel
            .exchange_declare(
                &cfg.exchange,
                cfg.kind(),
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(protocol_err)?;

        let mut args = FieldTable::default();
        if let Some(dlx) = &cfg.dead_letter_exchange {
            args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(dlx.as_str().into()),
            );
        }
        channel
            .queue_declare(
                &cfg.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(protocol_err)?;

        channel
            .queue_bind(
                &cfg.queue,
                &cfg.exchange,
                &cfg.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(protocol_err)?;

        tracing::info!(
            exchange = %cfg.exchange,
            queue = %cfg.queue,
            routing_key = %cfg.routing_key,
            dead_letter_exchange = cfg.dead_letter_exchange.as_deref().unwrap_or("-"),
            "declared broker topology"
        );
        Ok(())
    }
}

#[async_trait]
impl BrokerPort for RabbitBroker {
    async fn connect(&self) -> BrokerResult<()> {
        let mut guard = self.state.lock().await;
        if let Some(open) = guard.as_ref() {
            if open.connection.status().connected() {
                return Ok(());
            }
        }

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(REPLY_SUCCESS, "channel setup failed").await;
                return Err(BrokerError::Connect(e.to_string()));
            }
        };

        tracing::info!(exchange = %self.topology.exchange, "broker connected");
        *guard = Some(Open {
            connection,
            channel,
        });
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        let mut guard = self.state.lock().await;
        let Some(open) = guard.take() else {
            return Ok(());
        };

        // Close both halves even if the first fails; surface the first error.
        let channel_result = tolerate_closed(open.channel.close(REPLY_SUCCESS, "shutdown").await);
        let connection_result =
            tolerate_closed(open.connection.close(REPLY_SUCCESS, "shutdown").await);
        channel_result?;
        connection_result?;
        tracing::info!("broker connection closed");
        Ok(())
    }

    async fn publish(&self, routing_key: &str, payload: &[u8]) -> BrokerResult<()> {
        let channel = self.channel().await?;

        // Idempotent declare so publish does not depend on topology setup
        // having run first.
        channel
            .exchange_declare(
                &self.topology.exchange,
                self.topology.kind(),
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(protocol_err)?;

        channel
            .basic_publish(
                &self.topology.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(protocol_err)?
            .await
            .map_err(protocol_err)?;

        Ok(())
    }

    async fn consume(&self, queue: &str) -> BrokerResult<DeliveryStream> {
        let channel = self.channel().await?;

        // One unacknowledged delivery at a time serializes processing on
        // this channel.
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(protocol_err)?;

        let consumer = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(protocol_err)?;

        let stream = consumer.map(|delivery| match delivery {
            Ok(delivery) => {
                let acker = delivery.acker;
                Ok(InboundMessage::new(
                    delivery.data,
                    Box::new(RabbitSettler { acker }),
                ))
            }
            Err(e) => Err(protocol_err(e)),
        });
        Ok(Box::pin(stream))
    }
}

struct RabbitSettler {
    acker: Acker,
}

#[async_trait]
impl MessageSettler for RabbitSettler {
    async fn settle(self: Box<Self>, outcome: Disposition) -> BrokerResult<()> {
        let result = match outcome {
            Disposition::Ack => self.acker.ack(BasicAckOptions::default()).await,
            Disposition::Requeue => {
                self.acker
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
            }
            Disposition::Reject => self.acker.reject(BasicRejectOptions { requeue: false }).await,
        };
        result.map_err(protocol_err)
    }
}

fn protocol_err(e: lapin::Error) -> BrokerError {
    BrokerError::Protocol(e.to_string())
}

fn tolerate_closed(result: Result<(), lapin::Error>) -> BrokerResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(lapin::Error::InvalidChannelState(_)) | Err(lapin::Error::InvalidConnectionState(_)) => {
            Ok(())
        }
        Err(e) => Err(protocol_err(e)),
    }
}
