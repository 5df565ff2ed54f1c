//! Wire types for the JSRO batch and long-poll bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id assigned per queued request. Monotonic, never reused.
pub type CorrelationId = u64;

/// Message id on the long-poll channel. Monotonic per connection.
pub type MessageId = u64;

/// One entry of the outgoing POST batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRequest {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub action: RequestAction,
}

/// Payload of a batched request, tagged by its `action` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RequestAction {
    Create {
        name: String,
        spec: Value,
    },
    #[serde(rename_all = "camelCase")]
    Invoke {
        instance_id: String,
        method: String,
        args: Vec<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Destroy { instance_id: String },
}

/// A per-request result, delivered on the POST response or the poll channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    pub correlation_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// One entry of the long-poll response: a message id plus either a request
/// result or a server-initiated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollMessage {
    pub id: MessageId,
    #[serde(flatten)]
    pub payload: PollPayload,
}

/// Poll entry body once the message id is stripped off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PollPayload {
    Result(ResultMessage),
    #[serde(rename_all = "camelCase")]
    Event {
        event: String,
        instance_id: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

/// Body of the establishing GET.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstablishReply {
    pub connection_id: String,
}

/// Result payload of a `create` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReply {
    pub instance_id: String,
    pub methods: Vec<String>,
}

/// Result payload of an `invoke` request. A missing `result` field reads as
/// null, matching a method that returned nothing.
#[derive(Debug, Clone, Deserialize)]
pub struct InvokeReply {
    #[serde(default)]
    pub result: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_create_request_shape() {
        let request = OutboundRequest {
            correlation_id: 0,
            action: RequestAction::Create {
                name: "Foo".into(),
                spec: json!({"size": 3}),
            },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"correlationId": 0, "action": "create", "name": "Foo", "spec": {"size": 3}})
        );
    }

    #[test]
    fn test_invoke_request_shape() {
        let request = OutboundRequest {
            correlation_id: 1,
            action: RequestAction::Invoke {
                instance_id: "i1".into(),
                method: "ping".into(),
                args: vec![json!(1), json!(2)],
            },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "correlationId": 1,
                "action": "invoke",
                "instanceId": "i1",
                "method": "ping",
                "args": [1, 2]
            })
        );
    }

    #[test]
    fn test_destroy_request_shape() {
        let request = OutboundRequest {
            correlation_id: 2,
            action: RequestAction::Destroy {
                instance_id: "i1".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"correlationId": 2, "action": "destroy", "instanceId": "i1"})
        );
    }

    #[test]
    fn test_poll_entry_with_correlation_id_is_a_result() {
        let message: PollMessage =
            serde_json::from_value(json!({"id": 4, "correlationId": 7, "result": {"x": 1}}))
                .unwrap();
        assert_eq!(message.id, 4);
        assert_eq!(
            message.payload,
            PollPayload::Result(ResultMessage {
                correlation_id: 7,
                result: Some(json!({"x": 1})),
                error: None,
            })
        );
    }

    #[test]
    fn test_poll_entry_without_correlation_id_is_an_event() {
        let message: PollMessage = serde_json::from_value(
            json!({"id": 5, "event": "changed", "instanceId": "i1", "args": ["a"]}),
        )
        .unwrap();
        assert_eq!(
            message.payload,
            PollPayload::Event {
                event: "changed".into(),
                instance_id: "i1".into(),
                args: vec![json!("a")],
            }
        );
    }

    #[test]
    fn test_event_args_default_to_empty() {
        let message: PollMessage =
            serde_json::from_value(json!({"id": 6, "event": "closed", "instanceId": "i1"}))
                .unwrap();
        let PollPayload::Event { args, .. } = message.payload else {
            panic!("expected an event");
        };
        assert!(args.is_empty());
    }

    #[test]
    fn test_result_error_field_round_trips() {
        let message: ResultMessage =
            serde_json::from_value(json!({"correlationId": 3, "error": "boom"})).unwrap();
        assert_eq!(message.error, Some(json!("boom")));
        assert_eq!(message.result, None);
    }

    #[test]
    fn test_create_reply_parses() {
        let reply: CreateReply =
            serde_json::from_value(json!({"instanceId": "i1", "methods": ["ping", "close"]}))
                .unwrap();
        assert_eq!(reply.instance_id, "i1");
        assert_eq!(reply.methods, vec!["ping", "close"]);
    }
}
