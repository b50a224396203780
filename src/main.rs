use std::collections::HashMap;

use actix_cors::Cors;
use actix_web::{get, post, put, web, App, HttpRequest, HttpResponse, HttpServer};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{bson::doc, Client, Collection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

mod activity;
mod auth;
mod balance;
mod invite;
mod schemas;
mod settlement;
mod split;
mod transfers;

use activity::Activity;
use auth::Session;
use balance::{compute_balances, compute_group_summary, round_to_cents};
use invite::Invite;
use schemas::{Expense, Group, Member, MemberId, SettlementPayment, SplitPolicy};
use settlement::{outstanding_owed, validate_settlement, SettlementLocks};
use split::compute_splits;
use transfers::suggest_transfers;

const DATABASE: &str = "Divido";

struct AppState {
    client: Client,
    session_secret: String,
    settlement_locks: SettlementLocks,
}

impl AppState {
    fn groups(&self) -> Collection<Group> {
        self.client.database(DATABASE).collection("Groups")
    }

    fn settlements(&self) -> Collection<SettlementPayment> {
        self.client.database(DATABASE).collection("Settlements")
    }

    fn activities(&self) -> Collection<Activity> {
        self.client.database(DATABASE).collection("Activities")
    }

    fn invites(&self) -> Collection<Invite> {
        self.client.database(DATABASE).collection("Invites")
    }

    async fn load_group(&self, id: &str) -> Result<Option<Group>, mongodb::error::Error> {
        self.groups().find_one(doc! { "id": id }, None).await
    }

    async fn load_settlements(
        &self,
        group_id: &str,
    ) -> Result<Vec<SettlementPayment>, mongodb::error::Error> {
        self.settlements()
            .find(doc! { "group_id": group_id }, None)
            .await?
            .try_collect()
            .await
    }
}

// The browser client surfaces the `message` field of error bodies verbatim.
fn error_json(message: impl std::fmt::Display) -> serde_json::Value {
    serde_json::json!({ "message": message.to_string() })
}

fn authorize(request: &HttpRequest, state: &AppState) -> Result<Session, HttpResponse> {
    match auth::session_from_request(request, &state.session_secret) {
        Some(session) => Ok(session),
        None => {
            Err(HttpResponse::Unauthorized().json(error_json("missing or invalid session token")))
        }
    }
}

// Every ledger and balance operation requires that the session member already
// belongs to the group; membership is only ever granted through invites.
async fn member_group(
    state: &AppState,
    group_id: &str,
    session: &Session,
) -> Result<Group, HttpResponse> {
    match state.load_group(group_id).await {
        Ok(Some(group)) => {
            if group.has_member(&session.member_id) {
                Ok(group)
            } else {
                Err(HttpResponse::Forbidden().json(error_json("not a member of this group")))
            }
        }
        Ok(None) => {
            Err(HttpResponse::NotFound().json(error_json("Couldn't find the desired group")))
        }
        Err(err) => Err(HttpResponse::InternalServerError().json(error_json(err))),
    }
}

async fn record_activity(state: &AppState, activity: Activity) {
    if let Err(err) = state.activities().insert_one(&activity, None).await {
        warn!(group_id = %activity.group_id, "failed to record activity: {}", err);
    }
}

#[derive(Deserialize, Serialize)]
struct GroupJson {
    name: String,
    #[serde(default)]
    description: String,
    members: Vec<Member>,
}

#[put("/groups/{id}")]
async fn add_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
    json: web::Json<GroupJson>,
) -> HttpResponse {
    let session = match authorize(&request, &state) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let json = json.into_inner();
    if !json.members.iter().any(|m| m.id == session.member_id) {
        return HttpResponse::BadRequest()
            .json(error_json("the creating member must be part of the group"));
    }
    let group = Group {
        id: id.into_inner(),
        name: json.name,
        description: json.description,
        members: json.members,
        expenses: vec![],
    };
    match state.groups().insert_one(&group, None).await {
        Ok(_) => HttpResponse::Ok().body("Group added"),
        Err(err) => HttpResponse::InternalServerError().json(error_json(err)),
    }
}

#[get("/groups/{id}")]
async fn get_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let session = match authorize(&request, &state) {
        Ok(session) => session,
        Err(response) => return response,
    };
    match member_group(&state, &id, &session).await {
        Ok(group) => HttpResponse::Ok().json(group),
        Err(response) => response,
    }
}

#[derive(Deserialize)]
struct ExpenseJson {
    amount: f64,
    description: String,
    category: String,
    #[serde(default = "default_currency")]
    currency: String,
    paid_by: MemberId,
    participants: Vec<MemberId>,
    split_type: SplitPolicy,
    #[serde(default)]
    custom_amounts: Option<HashMap<MemberId, f64>>,
    #[serde(default)]
    notes: Option<String>,
}

fn default_currency() -> String {
    "PKR".to_string()
}

#[post("/groups/{id}/expenses")]
async fn add_expense(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
    json: web::Json<ExpenseJson>,
) -> HttpResponse {
    let session = match authorize(&request, &state) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let group = match member_group(&state, &id, &session).await {
        Ok(group) => group,
        Err(response) => return response,
    };
    let json = json.into_inner();
    if !(json.amount > 0.0) {
        return HttpResponse::BadRequest()
            .json(error_json("the expense amount must be a positive number"));
    }
    if !group.has_member(&json.paid_by) {
        return HttpResponse::BadRequest()
            .json(error_json("the payer is not a member of this group"));
    }
    if let Some(missing) = json.participants.iter().find(|p| !group.has_member(p)) {
        return HttpResponse::BadRequest().json(error_json(format!(
            "participant {} is not a member of this group",
            missing
        )));
    }

    let splits = match compute_splits(
        json.amount,
        &json.participants,
        json.split_type,
        json.custom_amounts.as_ref(),
    ) {
        Ok(splits) => splits,
        Err(err) => return HttpResponse::BadRequest().json(error_json(err)),
    };
    let expense = Expense {
        amount: json.amount,
        description: json.description,
        category: json.category,
        currency: json.currency,
        paid_by: json.paid_by,
        split_type: json.split_type,
        splits,
        notes: json.notes,
        created_at: Utc::now(),
    };

    let entry = match bson::to_bson(&expense) {
        Ok(entry) => entry,
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
    };
    match state
        .groups()
        .update_one(
            doc! { "id": &group.id },
            doc! { "$push": { "expenses": entry } },
            None,
        )
        .await
    {
        Ok(_) => {}
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
    }
    record_activity(&state, Activity::for_expense(&group.id, &expense)).await;
    HttpResponse::Ok().json(expense)
}

#[get("/groups/{id}/expenses")]
async fn list_expenses(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let session = match authorize(&request, &state) {
        Ok(session) => session,
        Err(response) => return response,
    };
    match member_group(&state, &id, &session).await {
        Ok(group) => HttpResponse::Ok().json(group.expenses),
        Err(response) => response,
    }
}

#[get("/groups/{id}/summary")]
async fn get_summary(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let session = match authorize(&request, &state) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let group = match member_group(&state, &id, &session).await {
        Ok(group) => group,
        Err(response) => return response,
    };
    let settlements = match state.load_settlements(&group.id).await {
        Ok(settlements) => settlements,
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
    };
    HttpResponse::Ok().json(compute_group_summary(&group, &settlements, &session.member_id))
}

#[derive(Serialize)]
struct MemberNet {
    member_id: MemberId,
    name: String,
    net: f64,
}

#[get("/groups/{id}/balance")]
async fn get_balance(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let session = match authorize(&request, &state) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let group = match member_group(&state, &id, &session).await {
        Ok(group) => group,
        Err(response) => return response,
    };
    let settlements = match state.load_settlements(&group.id).await {
        Ok(settlements) => settlements,
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
    };
    let balances = compute_balances(&group, &settlements);
    let nets: Vec<MemberNet> = group
        .members
        .iter()
        .map(|member| MemberNet {
            member_id: member.id.clone(),
            name: member.name.clone(),
            net: round_to_cents(balances.get(&member.id).copied().unwrap_or(0.0)),
        })
        .collect();
    HttpResponse::Ok().json(nets)
}

#[derive(Deserialize)]
struct SettlementJson {
    payer: MemberId,
    payee: MemberId,
    amount: f64,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

#[post("/groups/{id}/settlements")]
async fn record_settlement(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
    json: web::Json<SettlementJson>,
) -> HttpResponse {
    let session = match authorize(&request, &state) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let json = json.into_inner();
    if json.payer == json.payee {
        return HttpResponse::BadRequest()
            .json(error_json("the payer and payee must be different members"));
    }

    // The snapshot read, the outstanding-balance check and the insert all
    // happen under the pair's lock; a concurrent request for the same pair
    // waits and then sees this settlement in its own fresh snapshot.
    let lock = state
        .settlement_locks
        .acquire(&id, &json.payer, &json.payee);
    let _held = lock.lock().await;

    let group = match member_group(&state, &id, &session).await {
        Ok(group) => group,
        Err(response) => return response,
    };
    for member in [&json.payer, &json.payee] {
        if !group.has_member(member) {
            return HttpResponse::BadRequest()
                .json(error_json(format!("{} is not a member of this group", member)));
        }
    }
    let settlements = match state.load_settlements(&group.id).await {
        Ok(settlements) => settlements,
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
    };
    let outstanding = outstanding_owed(&group.expenses, &settlements, &json.payer, &json.payee);
    if let Err(err) = validate_settlement(json.amount, outstanding) {
        return HttpResponse::BadRequest().json(error_json(err));
    }

    let payment = SettlementPayment {
        group_id: group.id.clone(),
        payer: json.payer,
        payee: json.payee,
        amount: json.amount,
        method: json.method,
        note: json.note,
        created_at: Utc::now(),
    };
    match state.settlements().insert_one(&payment, None).await {
        Ok(_) => {}
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
    }
    record_activity(&state, Activity::for_settlement(&payment)).await;
    info!(group_id = %payment.group_id, payer = %payment.payer, payee = %payment.payee, "settlement recorded");
    HttpResponse::Ok().json(payment)
}

#[get("/groups/{id}/settlements")]
async fn list_settlements(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let session = match authorize(&request, &state) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let group = match member_group(&state, &id, &session).await {
        Ok(group) => group,
        Err(response) => return response,
    };
    match state.load_settlements(&group.id).await {
        Ok(settlements) => HttpResponse::Ok().json(settlements),
        Err(err) => HttpResponse::InternalServerError().json(error_json(err)),
    }
}

#[get("/groups/{id}/transfers")]
async fn get_transfers(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let session = match authorize(&request, &state) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let group = match member_group(&state, &id, &session).await {
        Ok(group) => group,
        Err(response) => return response,
    };
    let settlements = match state.load_settlements(&group.id).await {
        Ok(settlements) => settlements,
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
    };
    HttpResponse::Ok().json(suggest_transfers(&group, &settlements))
}

#[get("/groups/{id}/activities")]
async fn get_activities(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let session = match authorize(&request, &state) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let group = match member_group(&state, &id, &session).await {
        Ok(group) => group,
        Err(response) => return response,
    };
    let cursor = match state
        .activities()
        .find(doc! { "group_id": &group.id }, None)
        .await
    {
        Ok(cursor) => cursor,
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
    };
    let mut activities: Vec<Activity> = match cursor.try_collect().await {
        Ok(activities) => activities,
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
    };
    activities.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    HttpResponse::Ok().json(activities)
}

#[post("/groups/{id}/invites")]
async fn create_invite(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let session = match authorize(&request, &state) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let group = match member_group(&state, &id, &session).await {
        Ok(group) => group,
        Err(response) => return response,
    };
    let invite = Invite::new(&group.id);
    match state.invites().insert_one(&invite, None).await {
        Ok(_) => HttpResponse::Ok().json(invite),
        Err(err) => HttpResponse::InternalServerError().json(error_json(err)),
    }
}

#[derive(Deserialize)]
struct MemberProfileJson {
    name: String,
    email: String,
}

// Matches the group only while the member is absent, so two racing accepts
// can append at most once.
fn member_absent_filter(group_id: &str, member_id: &str) -> bson::Document {
    doc! { "id": group_id, "members.id": { "$ne": member_id } }
}

#[post("/invites/{code}/accept")]
async fn accept_invite(
    state: web::Data<AppState>,
    request: HttpRequest,
    code: web::Path<String>,
    json: web::Json<MemberProfileJson>,
) -> HttpResponse {
    // The invite grants membership, not identity: the accepting member must
    // already hold a credential signed by the identity provider.
    let session = match authorize(&request, &state) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let invite = match state
        .invites()
        .find_one(doc! { "code": code.into_inner() }, None)
        .await
    {
        Ok(Some(invite)) => invite,
        Ok(None) => return HttpResponse::NotFound().json(error_json("unknown invite code")),
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
    };
    if invite.is_expired(Utc::now()) {
        return HttpResponse::Gone().json(error_json("the invite code has expired"));
    }

    let json = json.into_inner();
    let member = Member {
        id: session.member_id,
        name: json.name,
        email: json.email,
    };
    let entry = match bson::to_bson(&member) {
        Ok(entry) => entry,
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
    };
    match state
        .groups()
        .update_one(
            member_absent_filter(&invite.group_id, &member.id),
            doc! { "$push": { "members": entry } },
            None,
        )
        .await
    {
        Ok(result) if result.matched_count == 0 => {
            // Nothing matched: the member already joined, or the group is
            // gone. Tell the two apart so a stale invite still 404s.
            match state.load_group(&invite.group_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    return HttpResponse::NotFound()
                        .json(error_json("Couldn't find the desired group"))
                }
                Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
            }
        }
        Ok(_) => {
            info!(group_id = %invite.group_id, member_id = %member.id, "member joined via invite")
        }
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err)),
    }
    HttpResponse::Ok().json(member)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let uri = std::env::var("MONGODB_URI").expect("You need to add the MONGODB_URI to the env");
    let session_secret =
        std::env::var("SESSION_SECRET").expect("You need to add the SESSION_SECRET to the env");
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let client = Client::with_uri_str(&uri).await.expect("failed to connect");
    info!("connected to MongoDB");

    let state = web::Data::new(AppState {
        client,
        session_secret,
        settlement_locks: SettlementLocks::default(),
    });

    info!(%bind_addr, "starting server");
    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .service(add_group)
            .service(get_group)
            .service(add_expense)
            .service(list_expenses)
            .service(get_summary)
            .service(get_balance)
            .service(record_settlement)
            .service(list_settlements)
            .service(get_transfers)
            .service(get_activities)
            .service(create_invite)
            .service(accept_invite)
    })
    .bind(bind_addr)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::{header, StatusCode};
    use actix_web::test::{call_service, init_service, TestRequest};

    #[test]
    fn error_bodies_carry_a_message_field() {
        assert_eq!(
            error_json("not a member of this group"),
            serde_json::json!({ "message": "not a member of this group" })
        );
    }

    #[test]
    fn the_join_filter_excludes_existing_members() {
        assert_eq!(
            member_absent_filter("g1", "ana"),
            doc! { "id": "g1", "members.id": { "$ne": "ana" } }
        );
    }

    async fn test_state() -> web::Data<AppState> {
        // The driver connects lazily, so no server is needed to build a state.
        let client = Client::with_uri_str("mongodb://localhost:27017")
            .await
            .unwrap();
        web::Data::new(AppState {
            client,
            session_secret: "secret".to_string(),
            settlement_locks: SettlementLocks::default(),
        })
    }

    #[actix_web::test]
    async fn accepting_an_invite_requires_a_verified_session() {
        let app = init_service(App::new().app_data(test_state().await).service(accept_invite)).await;
        let request = TestRequest::post()
            .uri("/invites/ABCD1234/accept")
            .set_json(serde_json::json!({ "name": "Ana", "email": "ana@example.com" }))
            .to_request();
        let response = call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn a_forged_bearer_token_is_turned_away() {
        let app = init_service(App::new().app_data(test_state().await).service(accept_invite)).await;
        let request = TestRequest::post()
            .uri("/invites/ABCD1234/accept")
            .insert_header((header::AUTHORIZATION, "Bearer ana:0:deadbeef"))
            .set_json(serde_json::json!({ "name": "Ana", "email": "ana@example.com" }))
            .to_request();
        let response = call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
