use log::warn;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::config::{EdgeDetect, PinMode};
use crate::error::GpioError;
use crate::events::EventHub;
use crate::hx711::Gain;
use crate::line::check_pin;
use crate::registry::PinRegistry;
use crate::waveform::PwmSettings;
use crate::watch::EdgeEvent;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PinRegistry>,
    pub events: Arc<EventHub>,
}

#[derive(Deserialize)]
struct InitPayload {
    mode: PinMode,
    #[serde(default)]
    param: u32,
}

#[derive(Deserialize)]
struct BlinkPayload {
    period_ms: u32,
}

#[derive(Deserialize)]
struct PulsePayload {
    duration_ms: u32,
}

#[derive(Deserialize)]
struct WatchPayload {
    mode: PinMode,
    #[serde(default)]
    debounce_us: u32,
    edge: EdgeDetect,
}

#[derive(Deserialize)]
struct Hx711InitPayload {
    clock_pin: u32,
}

#[derive(Deserialize, Default)]
struct Hx711Query {
    #[serde(default)]
    gain: Gain,
    #[serde(default)]
    samples: u32,
}

#[derive(Deserialize, Default)]
struct EventsQuery {
    limit: Option<usize>,
}

async fn handle_event_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<EdgeEvent>,
    pin_filter: Option<u32>,
) {
    let mut events = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(Message::Text(_))
                    | Ok(Message::Binary(_))
                    | Ok(Message::Pong(_))
                    | Ok(Message::Continuation(_))
                    | Ok(Message::Nop) => {}
                    Err(_) => break,
                }
            }
            event = events.next() => {
                let Some(event) = event else { break; };

                match event {
                    Ok(event) => {
                        if pin_filter.is_some_and(|p| p != event.pin) {
                            continue;
                        }
                        if let Ok(text) = serde_json::to_string(&event)
                            && session.text(text).await.is_err()
                        {
                            warn!("WebSocket client disconnected");
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        let notice = json!({ "error": format!("Event stream lagged by {n} messages") });
                        if session.text(notice.to_string()).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl AppState {
    pub fn new(registry: Arc<PinRegistry>, events: Arc<EventHub>) -> Self {
        Self { registry, events }
    }

    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/pins")
                    .route(web::get().to(list_pins))
                    .route(reject_others(&[Method::GET])),
            )
            .service(
                web::resource("/pins/events")
                    .route(web::get().to(events_ws_all))
                    .route(reject_others(&[Method::GET])),
            )
            .service(
                web::resource("/pin/{pin_id}")
                    .route(web::get().to(pin_status))
                    .route(reject_others(&[Method::GET])),
            )
            .service(
                web::resource("/pin/{pin_id}/init")
                    .route(web::post().to(init_pin))
                    .route(reject_others(&[Method::POST])),
            )
            .service(
                web::resource("/pin/{pin_id}/deinit")
                    .route(web::post().to(deinit_pin))
                    .route(reject_others(&[Method::POST])),
            )
            .service(
                web::resource("/pin/{pin_id}/value")
                    .route(web::get().to(get_value))
                    .route(web::post().to(set_value))
                    .route(reject_others(&[Method::GET, Method::POST])),
            )
            .service(
                web::resource("/pin/{pin_id}/toggle")
                    .route(web::post().to(toggle_value))
                    .route(reject_others(&[Method::POST])),
            )
            .service(
                web::resource("/pin/{pin_id}/blink")
                    .route(web::post().to(start_blink))
                    .route(web::delete().to(stop_blink))
                    .route(reject_others(&[Method::POST, Method::DELETE])),
            )
            .service(
                web::resource("/pin/{pin_id}/pulse")
                    .route(web::post().to(start_pulse))
                    .route(web::delete().to(stop_pulse))
                    .route(reject_others(&[Method::POST, Method::DELETE])),
            )
            .service(
                web::resource("/pin/{pin_id}/pwm")
                    .route(web::get().to(get_pwm))
                    .route(web::post().to(set_pwm))
                    .route(web::delete().to(stop_pwm))
                    .route(reject_others(&[Method::GET, Method::POST, Method::DELETE])),
            )
            .service(
                web::resource("/pin/{pin_id}/watch")
                    .route(web::post().to(start_watch))
                    .route(reject_others(&[Method::POST])),
            )
            .service(
                web::resource("/pin/{pin_id}/event")
                    .route(web::get().to(get_last_event))
                    .route(reject_others(&[Method::GET])),
            )
            .service(
                web::resource("/pin/{pin_id}/events")
                    .route(web::get().to(get_events))
                    .route(reject_others(&[Method::GET])),
            )
            .service(
                web::resource("/pin/{pin_id}/events/stream")
                    .route(web::get().to(events_ws_pin))
                    .route(reject_others(&[Method::GET])),
            )
            .service(
                web::resource("/hx711/{pin_id}/init")
                    .route(web::post().to(init_hx711))
                    .route(reject_others(&[Method::POST])),
            )
            .service(
                web::resource("/hx711/{pin_id}/value")
                    .route(web::get().to(read_hx711))
                    .route(reject_others(&[Method::GET])),
            )
    }
}

async fn blocking<T, F>(f: F) -> Result<T, GpioError>
where
    F: FnOnce() -> Result<T, GpioError> + Send + 'static,
    T: Send + 'static,
{
    web::block(f)
        .await
        .map_err(|e| GpioError::Os(format!("Blocking task failed: {e}")))?
}

async fn list_pins(state: web::Data<AppState>) -> Result<impl Responder, GpioError> {
    let registry = state.registry.clone();
    let pins = blocking(move || Ok(registry.list())).await?;

    Ok(web::Json(pins))
}

async fn pin_status(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let registry = state.registry.clone();
    let status = blocking(move || registry.status(pin_id)).await?;

    Ok(web::Json(status))
}

async fn init_pin(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let payload: InitPayload = parse_json_payload(&body, "init")?;
    let registry = state.registry.clone();
    let status = blocking(move || {
        registry.init(pin_id, payload.mode, payload.param)?;
        registry.status(pin_id)
    })
    .await?;

    Ok(web::Json(status))
}

async fn deinit_pin(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let registry = state.registry.clone();
    blocking(move || registry.deinit(pin_id)).await?;
    state.events.clear(pin_id);

    Ok(HttpResponse::Ok())
}

async fn get_value(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let registry = state.registry.clone();
    let value = blocking(move || registry.read(pin_id)).await?;

    Ok(web::Json(value))
}

async fn set_value(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let value = parse_value_payload(&body)?;
    let registry = state.registry.clone();
    blocking(move || registry.write(pin_id, value)).await?;

    Ok(HttpResponse::Ok())
}

async fn toggle_value(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let registry = state.registry.clone();
    let value = blocking(move || registry.toggle(pin_id)).await?;

    Ok(web::Json(value))
}

async fn start_blink(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let payload: BlinkPayload = parse_json_payload(&body, "blink")?;
    let registry = state.registry.clone();
    blocking(move || registry.blink(pin_id, payload.period_ms)).await?;

    Ok(HttpResponse::Ok())
}

async fn stop_blink(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let registry = state.registry.clone();
    blocking(move || registry.stop_blink(pin_id)).await?;

    Ok(HttpResponse::Ok())
}

async fn start_pulse(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let payload: PulsePayload = parse_json_payload(&body, "pulse")?;
    let registry = state.registry.clone();
    blocking(move || registry.pulse(pin_id, payload.duration_ms)).await?;

    Ok(HttpResponse::Ok())
}

async fn stop_pulse(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let registry = state.registry.clone();
    blocking(move || registry.stop_pulse(pin_id)).await?;

    Ok(HttpResponse::Ok())
}

async fn get_pwm(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let registry = state.registry.clone();
    let settings = blocking(move || registry.pwm_settings(pin_id)).await?;

    Ok(web::Json(settings))
}

async fn set_pwm(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let settings: PwmSettings = parse_json_payload(&body, "pwm")?;
    let registry = state.registry.clone();
    let applied = blocking(move || {
        registry.pwm(pin_id, settings)?;
        registry.pwm_settings(pin_id)
    })
    .await?;

    Ok(web::Json(applied))
}

async fn stop_pwm(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let registry = state.registry.clone();
    blocking(move || registry.stop_pwm(pin_id)).await?;

    Ok(HttpResponse::Ok())
}

async fn start_watch(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let payload: WatchPayload = parse_json_payload(&body, "watch")?;
    let registry = state.registry.clone();
    let callback = state.events.callback();
    blocking(move || {
        registry.watch(
            pin_id,
            payload.mode,
            payload.debounce_us,
            payload.edge,
            callback,
        )
    })
    .await?;
    state.events.clear(pin_id);

    Ok(HttpResponse::Ok())
}

async fn get_last_event(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    check_pin(pin_id)?;

    match state.events.last_event(pin_id) {
        Some(event) => Ok(HttpResponse::Ok().json(event)),
        None => Ok(HttpResponse::Ok().finish()),
    }
}

async fn get_events(
    req: HttpRequest,
    query: web::Query<EventsQuery>,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    check_pin(pin_id)?;

    Ok(web::Json(state.events.events(pin_id, query.limit)))
}

async fn events_ws_all(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GpioError> {
    open_event_websocket(&req, stream, &state, None)
}

async fn events_ws_pin(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    check_pin(pin_id)?;
    open_event_websocket(&req, stream, &state, Some(pin_id))
}

fn open_event_websocket(
    req: &HttpRequest,
    stream: web::Payload,
    state: &AppState,
    pin_filter: Option<u32>,
) -> Result<HttpResponse, GpioError> {
    let rx = state.events.subscribe();
    let (response, session, client_stream) = actix_ws::handle(req, stream)
        .map_err(|e| GpioError::Os(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_event_websocket(session, client_stream, rx, pin_filter).await;
    });

    Ok(response)
}

async fn init_hx711(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let payload: Hx711InitPayload = parse_json_payload(&body, "hx711")?;
    let registry = state.registry.clone();
    blocking(move || registry.init_hx711(pin_id, payload.clock_pin)).await?;

    Ok(HttpResponse::Ok())
}

async fn read_hx711(
    req: HttpRequest,
    query: web::Query<Hx711Query>,
    state: web::Data<AppState>,
) -> Result<impl Responder, GpioError> {
    let pin_id = parse_pin_id(&req)?;
    let Hx711Query { gain, samples } = query.into_inner();
    let registry = state.registry.clone();
    let task = blocking(move || registry.read_hx711_async(pin_id, gain, samples)).await?;
    let value = task.completion().await??;

    Ok(web::Json(value))
}

fn parse_value_payload(body: &[u8]) -> Result<u8, GpioError> {
    if body.is_empty() {
        return Err(GpioError::InvalidParameter("Empty value payload".into()));
    }

    match std::str::from_utf8(body) {
        Ok(text) => text
            .trim()
            .parse::<u8>()
            .map_err(|_| GpioError::InvalidParameter("Value must be an integer".into())),
        _ => Err(GpioError::InvalidParameter(
            "Value payload must be valid UTF-8".into(),
        )),
    }
}

fn parse_json_payload<T: serde::de::DeserializeOwned>(
    body: &[u8],
    what: &str,
) -> Result<T, GpioError> {
    if body.is_empty() {
        return Err(GpioError::InvalidParameter(format!("Empty {what} payload")));
    }

    serde_json::from_slice(body)
        .map_err(|e| GpioError::InvalidParameter(format!("Invalid {what} payload: {e}")))
}

fn parse_pin_id(req: &HttpRequest) -> Result<u32, GpioError> {
    let pin_id = req
        .match_info()
        .get("pin_id")
        .ok_or_else(|| GpioError::InvalidParameter("Missing pin id".into()))?;
    let pin_id = pin_id
        .parse::<u32>()
        .map_err(|_| GpioError::InvalidParameter("Invalid pin id".into()))?;

    Ok(pin_id)
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn reject_others(methods: &[Method]) -> actix_web::Route {
    web::route()
        .guard(guard_not_methods(methods))
        .to(method_not_allowed)
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard + use<> {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
