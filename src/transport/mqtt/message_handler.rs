//! Pure routing of rumqttc events for a publishing session

use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Pure routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Delivery guarantee requested for every message
    pub fn publish_qos() -> QoS {
        QoS::ExactlyOnce
    }

    /// Route MQTT event to the session state it affects
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => {
                    if matches!(connack.code, ConnectReturnCode::Success) {
                        EventRoute::ConnectionAcknowledged
                    } else {
                        EventRoute::ConnectionRefused(format!("{:?}", connack.code))
                    }
                }
                Packet::PubComp(pubcomp) => EventRoute::PublishCompleted {
                    packet_id: pubcomp.pkid,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent { packet_id: *pkid },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK with success code
    ConnectionAcknowledged,
    /// CONNACK with a failure code
    ConnectionRefused(String),
    /// A queued publish was written to the wire with this packet id
    PublishSent { packet_id: u16 },
    /// Final step of an exactly-once publish
    PublishCompleted { packet_id: u16 },
    /// Broker closed the session
    Disconnected,
    /// Anything else coming from the broker
    InfrastructureEvent(String),
    OutgoingEvent,
}
