use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::REFERER;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use url::Url;

use super::error::GatewayError;
use super::pages;
use super::state::GatewayState;
use super::types::{FlowState, NewTicketBody, TicketStatusBody, sanitize_return};
use crate::relay::{ClientContext, found};
use crate::types::{AccountName, TicketId, unix_now};
use crate::zentao::ApiLoginSigner;

/// Create the gateway router.
pub fn gateway_routes(state: GatewayState) -> Router {
    let settings = &state.settings;

    let mut router = Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route(&settings.route("login"), get(login))
        .route(&settings.route("newticket"), get(new_ticket).post(new_ticket))
        .route(&settings.route("status"), get(ticket_status))
        .route(&settings.route("complete"), get(complete))
        .route(&settings.route("callback"), get(callback))
        .route(&settings.route("event"), post(event));

    if settings.sync_enabled {
        router = router.route(&settings.route("sync"), get(sync));
    }

    router.with_state(state)
}

// ── Index ──────────────────────────────────────────────────────────

async fn home(State(state): State<GatewayState>) -> Html<String> {
    pages::index(state.settings.base_path())
}

async fn health() -> &'static str {
    "ok"
}

// ── One-click login ────────────────────────────────────────────────

#[derive(Deserialize)]
struct ReturnParams {
    #[serde(rename = "return")]
    return_to: Option<String>,
}

async fn login(
    State(state): State<GatewayState>,
    Query(params): Query<ReturnParams>,
    headers: HeaderMap,
) -> Response {
    let return_to = state.return_destination(params.return_to.as_deref(), &headers);
    let auth_url = state.provider.authorization_url(
        &state.settings.callback_url(&return_to),
        &FlowState::Primary.encode(),
    );
    found(auth_url.as_str())
}

// ── Scan-to-login tickets ──────────────────────────────────────────

#[derive(Deserialize)]
struct TicketParams {
    ticket: Option<String>,
}

impl TicketParams {
    fn ticket_id(&self) -> Option<TicketId> {
        self.ticket
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(TicketId::from)
    }
}

async fn new_ticket(
    State(state): State<GatewayState>,
    Query(params): Query<ReturnParams>,
    headers: HeaderMap,
) -> Result<Json<NewTicketBody>, GatewayError> {
    let return_to = state.return_destination(params.return_to.as_deref(), &headers);
    let ticket = state.tickets.create(&return_to).await?;
    let flow = FlowState::Secondary {
        ticket: Some(ticket.clone()),
    };
    let auth_url = state
        .provider
        .authorization_url(&state.settings.callback_url("/"), &flow.encode());

    tracing::debug!(ticket = %ticket, return_to = %return_to, "created login ticket");
    Ok(Json(NewTicketBody {
        ticket,
        return_to,
        auth_url: auth_url.into(),
    }))
}

async fn ticket_status(
    State(state): State<GatewayState>,
    Query(params): Query<TicketParams>,
) -> Response {
    let Some(id) = params.ticket_id() else {
        return Json(TicketStatusBody {
            ok: false,
            redirect: None,
        })
        .into_response();
    };
    match state.tickets.get(&id).await {
        Ok(ticket) => {
            let redirect = ticket.and_then(|t| t.fulfillment).map(|f| f.redirect);
            Json(TicketStatusBody {
                ok: redirect.is_some(),
                redirect,
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(ticket = %id, error = %e, "ticket lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TicketStatusBody {
                    ok: false,
                    redirect: None,
                }),
            )
                .into_response()
        }
    }
}

/// Primary-device side of the scan flow: relay the session the scanner authorized.
async fn complete(
    State(state): State<GatewayState>,
    Query(params): Query<TicketParams>,
    client: ClientContext,
) -> Result<Response, GatewayError> {
    let id = params.ticket_id().ok_or(GatewayError::MissingTicket)?;
    let ticket = state
        .tickets
        .get(&id)
        .await?
        .ok_or(GatewayError::UnknownTicket)?;
    let fulfillment = ticket.fulfillment.ok_or(GatewayError::TicketPending)?;

    tracing::info!(ticket = %id, account = %fulfillment.account, "completing scan login");
    let overdue = fulfillment.signature_overdue(unix_now(), ApiLoginSigner::SIGNATURE_WINDOW);
    if let Some(age) = overdue {
        tracing::warn!(
            ticket = %id,
            account = %fulfillment.account,
            age_secs = age,
            "impersonation URL was signed too long ago, ZenTao may reject it"
        );
    }
    let response = match Url::parse(&fulfillment.redirect) {
        Ok(impersonation) => {
            state
                .relay
                .redirect(
                    &state.target.home_url(),
                    &impersonation,
                    &client,
                    &ticket.return_to,
                )
                .await
        }
        Err(e) => {
            tracing::warn!(ticket = %id, error = %e, "stored impersonation URL is invalid");
            found(&ticket.return_to)
        }
    };
    Ok(response)
}

// ── DingTalk callback ──────────────────────────────────────────────

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    #[serde(rename = "return")]
    return_to: Option<String>,
}

async fn callback(
    State(state): State<GatewayState>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    client: ClientContext,
) -> Result<Response, GatewayError> {
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(GatewayError::MissingCode)?;
    let flow = FlowState::parse(params.state.as_deref().unwrap_or_default());

    let account = state.authenticate(&code).await?;
    let impersonation = state.target.impersonation_url(&account);

    match flow {
        FlowState::Primary => {
            let return_to = state.return_destination(params.return_to.as_deref(), &headers);
            tracing::info!(account = %account, return_to = %return_to, "one-click login");
            Ok(state
                .relay
                .redirect(&state.target.home_url(), &impersonation, &client, &return_to)
                .await)
        }
        FlowState::Secondary { ticket } => {
            match ticket {
                Some(ticket) => state.fulfill_ticket(&ticket, &account, &impersonation).await,
                None => tracing::warn!(account = %account, "scan login without ticket"),
            }
            Ok(([(axum::http::header::CACHE_CONTROL, "no-store")], Html(pages::AUTHORIZED))
                .into_response())
        }
    }
}

// ── Directory sync & events ────────────────────────────────────────

#[derive(Deserialize)]
struct SyncParams {
    code: Option<String>,
}

async fn sync(
    State(state): State<GatewayState>,
    Query(params): Query<SyncParams>,
) -> Result<String, GatewayError> {
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(GatewayError::MissingCode)?;
    let token = state.provider.exchange_code(&code).await?;
    let synced = state
        .resolver
        .sync_directory(state.provider.as_ref(), &token)
        .await?;
    Ok(format!("directory sync finished, {synced} users processed"))
}

async fn event(body: Bytes) -> Json<serde_json::Value> {
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
    tracing::info!(event = %payload, "DingTalk event received");
    Json(serde_json::json!({ "code": 0, "msg": "ok" }))
}

// ── Helpers ────────────────────────────────────────────────────────

impl GatewayState {
    /// Exchange the code, fetch the profile and resolve the ZenTao account.
    async fn authenticate(&self, code: &str) -> Result<AccountName, GatewayError> {
        let token = self.provider.exchange_code(code).await?;
        let identity = self.provider.fetch_profile(&token).await?;
        Ok(self.resolver.resolve(&identity).await?)
    }

    /// Ticket failures only reach the log; the scanner still sees success.
    async fn fulfill_ticket(&self, ticket: &TicketId, account: &AccountName, impersonation: &Url) {
        match self
            .tickets
            .fulfill(ticket, account, impersonation.as_str())
            .await
        {
            Ok(true) => tracing::info!(ticket = %ticket, account = %account, "scan login authorized"),
            Ok(false) => {
                tracing::warn!(ticket = %ticket, account = %account, "ticket unknown, expired or already used");
            }
            Err(e) => tracing::error!(ticket = %ticket, error = %e, "ticket fulfilment failed"),
        }
    }

    fn return_destination(&self, requested: Option<&str>, headers: &HeaderMap) -> String {
        let referer = headers.get(REFERER).and_then(|v| v.to_str().ok());
        let home = self.target.home_url();
        sanitize_return(
            requested.or(referer),
            &[&home, &self.settings.public_base],
        )
    }
}
