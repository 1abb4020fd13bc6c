//! Session-bus side of the portal strategy, built on `zbus`.

use std::collections::HashMap;

use futures_util::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use zbus::message::Type as MessageType;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::{Connection, MatchRule, Message, MessageStream};

use super::{
    classify_error_name, new_token, request_path, PortalError, PortalEvent, PortalSession,
    PortalStep, DESTINATION, PORTAL_PATH, REQUEST_INTERFACE, SESSION_INTERFACE, SHORTCUTS_INTERFACE,
    SHORTCUT_DESCRIPTION, SHORTCUT_ID,
};
use crate::hotkey::{Binding, Signal, SignalKind, SignalSender, StrategyKind};

impl From<zbus::Error> for PortalError {
    fn from(e: zbus::Error) -> Self {
        match e {
            zbus::Error::MethodError(name, detail, _) => {
                classify_error_name(name.as_str(), detail.as_deref().unwrap_or(""))
            }
            zbus::Error::FDO(fdo) => match *fdo {
                zbus::fdo::Error::ServiceUnknown(m)
                | zbus::fdo::Error::NameHasNoOwner(m)
                | zbus::fdo::Error::UnknownInterface(m)
                | zbus::fdo::Error::UnknownMethod(m)
                | zbus::fdo::Error::UnknownObject(m) => PortalError::ServiceUnknown(m),
                other => PortalError::Negotiation(other.to_string()),
            },
            zbus::Error::InterfaceNotFound => {
                PortalError::ServiceUnknown("GlobalShortcuts interface not found".into())
            }
            other => PortalError::Negotiation(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// PortalTask
// ---------------------------------------------------------------------------

/// Handle to a running negotiation task.
pub(super) struct PortalTask {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PortalTask {
    pub(super) fn spawn(
        runtime: &tokio::runtime::Handle,
        binding: Binding,
        signals: SignalSender,
    ) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = runtime.spawn(run(binding, signals, shutdown_rx));
        Self { shutdown, task }
    }

    /// Ask the task to close the session and exit.  The task may already be
    /// gone; that is fine.  The returned handle finishes once the session is
    /// closed.
    pub(super) fn shutdown(self) -> JoinHandle<()> {
        let _ = self.shutdown.send(());
        self.task
    }
}

async fn run(binding: Binding, signals: SignalSender, mut shutdown: oneshot::Receiver<()>) {
    let send = |kind: SignalKind| {
        let _ = signals.send(Signal {
            generation: binding.generation,
            source: StrategyKind::Portal,
            kind,
        });
    };

    let conn = match Connection::session().await {
        Ok(conn) => conn,
        Err(e) => {
            let err = PortalError::ServiceUnknown(format!("session bus: {e}"));
            log::info!("[portal] {err}");
            send(SignalKind::Failed(err.into()));
            return;
        }
    };

    let mut session = PortalSession::default();
    let outcome = tokio::select! {
        result = negotiate(&conn, &binding, &mut session, &send) => Some(result),
        _ = &mut shutdown => None,
    };

    match outcome {
        None => log::debug!("[portal] shutdown requested"),
        Some(Ok(())) => {}
        Some(Err(err)) => send(SignalKind::Failed(err.into())),
    }

    close(&conn, &session).await;
}

/// Drive CreateSession → BindShortcuts → Activated/Deactivated until the
/// stream ends or an error occurs.
async fn negotiate(
    conn: &Connection,
    binding: &Binding,
    session: &mut PortalSession,
    send: &impl Fn(SignalKind),
) -> Result<(), PortalError> {
    // Subscribe before calling so no Response can slip past.
    let rule = MatchRule::builder()
        .msg_type(MessageType::Signal)
        .path_namespace(PORTAL_PATH)?
        .build();
    let mut stream = MessageStream::for_match_rule(rule, conn, None).await?;

    let sender = conn
        .unique_name()
        .map(|name| name.to_string())
        .unwrap_or_default();

    let handle_token = new_token();
    session.request_path = Some(request_path(&sender, &handle_token));
    let options: HashMap<&str, Value<'_>> = HashMap::from([
        ("handle_token", Value::from(handle_token.as_str())),
        ("session_handle_token", Value::from(new_token())),
    ]);
    let reply = conn
        .call_method(
            Some(DESTINATION),
            PORTAL_PATH,
            Some(SHORTCUTS_INTERFACE),
            "CreateSession",
            &(options,),
        )
        .await?;
    if let Ok(path) = reply.body().deserialize::<OwnedObjectPath>() {
        session.request_path = Some(path.to_string());
    }

    while let Some(msg) = stream.next().await {
        let Some(event) = decode(&msg?) else {
            continue;
        };
        match session.apply(event)? {
            PortalStep::Bind { session_path } => {
                bind_shortcuts(conn, binding, session, &sender, &session_path).await?;
            }
            PortalStep::Ready => {
                log::info!("[portal] {} bound", binding.accelerator);
                send(SignalKind::Ready);
            }
            PortalStep::Edge(edge) => {
                log::trace!("[portal] {edge:?}");
                send(SignalKind::Edge(edge));
            }
            PortalStep::Ignore => {}
        }
    }

    Err(PortalError::Negotiation("portal signal stream ended".into()))
}

async fn bind_shortcuts(
    conn: &Connection,
    binding: &Binding,
    session: &mut PortalSession,
    sender: &str,
    session_path: &str,
) -> Result<(), PortalError> {
    let handle_token = new_token();
    session.request_path = Some(request_path(sender, &handle_token));

    let trigger = binding.accelerator.to_portal_trigger();
    let descriptor: HashMap<&str, Value<'_>> = HashMap::from([
        ("description", Value::from(SHORTCUT_DESCRIPTION)),
        ("preferred_trigger", Value::from(trigger.as_str())),
    ]);
    let options: HashMap<&str, Value<'_>> =
        HashMap::from([("handle_token", Value::from(handle_token.as_str()))]);
    let session_handle = ObjectPath::try_from(session_path).map_err(zbus::Error::from)?;

    let reply = conn
        .call_method(
            Some(DESTINATION),
            PORTAL_PATH,
            Some(SHORTCUTS_INTERFACE),
            "BindShortcuts",
            &(session_handle, vec![(SHORTCUT_ID, descriptor)], "", options),
        )
        .await?;
    if let Ok(path) = reply.body().deserialize::<OwnedObjectPath>() {
        session.request_path = Some(path.to_string());
    }
    Ok(())
}

/// Best-effort release of whatever the negotiation left behind.  Failures
/// are logged and never propagated.
async fn close(conn: &Connection, session: &PortalSession) {
    let targets = [
        (session.request_path.as_deref(), REQUEST_INTERFACE),
        (session.session_path.as_deref(), SESSION_INTERFACE),
    ];
    for (path, interface) in targets {
        let Some(path) = path else { continue };
        let result = conn
            .call_method(Some(DESTINATION), path, Some(interface), "Close", &())
            .await;
        if let Err(e) = result {
            log::warn!("[portal] {interface}.Close on {path} failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn decode(msg: &Message) -> Option<PortalEvent> {
    let header = msg.header();
    let member = header.member()?.as_str().to_string();
    let path = header.path()?.as_str().to_string();

    let event = match member.as_str() {
        "Response" => {
            let (code, results): (u32, HashMap<String, OwnedValue>) =
                msg.body().deserialize().ok()?;
            let session_handle = results.get("session_handle").and_then(|v| match &**v {
                Value::Str(s) => Some(s.as_str().to_string()),
                Value::ObjectPath(p) => Some(p.as_str().to_string()),
                _ => None,
            });
            PortalEvent::Response {
                request_path: path,
                code,
                session_handle,
            }
        }
        "Activated" | "Deactivated" => {
            let (session_path, shortcut_id, _timestamp, _options): (
                OwnedObjectPath,
                String,
                u64,
                HashMap<String, OwnedValue>,
            ) = msg.body().deserialize().ok()?;
            let session_path = session_path.to_string();
            if member == "Activated" {
                PortalEvent::Activated {
                    session_path,
                    shortcut_id,
                }
            } else {
                PortalEvent::Deactivated {
                    session_path,
                    shortcut_id,
                }
            }
        }
        _ => return None,
    };
    Some(event)
}
