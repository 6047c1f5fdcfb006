use crate::database::Database;
use axum::extract::Path;
use modcore::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const TABLE: &str = "users";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

/// User routes plus the `current_user` context property, resolved from the
/// `x-user-id` header once per request.
pub async fn user(setup: SetupHandle) -> anyhow::Result<()> {
    setup.assert_module_exists("database", None)?;
    let db: CoreProperty<Database> = setup.core_property("db")?;

    let lookup = db.clone();
    let current_user =
        setup.define_context_cache_property("current_user", move |ctx: &Context| {
            let id = ctx.headers().get("x-user-id")?.to_str().ok()?;
            let db = lookup.get(ctx.app())?;
            serde_json::from_str::<User>(&db.get(TABLE, id)?).ok()
        })?;

    let seed = db.clone();
    let app = setup.app().clone();
    setup.after(move || async move {
        if let Some(db) = seed.get(&app) {
            let admin = User {
                id: "admin".to_string(),
                name: "Admin".to_string(),
                email: "admin@example.com".to_string(),
            };
            db.insert(TABLE, &admin.id, serde_json::to_string(&admin)?);
            tracing::info!("👤 Seeded admin user");
        }
        anyhow::Ok(())
    });

    let list_db = db.clone();
    let create_db = db.clone();
    let find_db = db;
    setup.routes(
        Router::new()
            .route(
                "/users",
                get(move |ctx: Context| {
                    let db = list_db.clone();
                    async move { Json(load_all(&db, &ctx)) }
                })
                .post(move |ctx: Context, Json(req): Json<CreateUserRequest>| {
                    let db = create_db.clone();
                    async move { create(&db, &ctx, req) }
                }),
            )
            .route(
                "/users/{id}",
                get(move |ctx: Context, Path(id): Path<String>| {
                    let db = find_db.clone();
                    async move {
                        db.get(ctx.app())
                            .and_then(|db| db.get(TABLE, &id))
                            .and_then(|raw| serde_json::from_str::<User>(&raw).ok())
                            .map(Json)
                            .ok_or(StatusCode::NOT_FOUND)
                    }
                }),
            )
            .route(
                "/me",
                get(move |ctx: Context| {
                    let current_user = current_user.clone();
                    async move {
                        current_user
                            .get(&ctx)
                            .map(|user| Json(User::clone(&user)))
                            .ok_or(StatusCode::UNAUTHORIZED)
                    }
                }),
            ),
    )?;

    setup.destroy(|| async {
        tracing::info!("👤 User module stopped");
        anyhow::Ok(())
    });
    Ok(())
}

fn load_all(db: &CoreProperty<Database>, ctx: &Context) -> Vec<User> {
    db.get(ctx.app())
        .map(|db| {
            db.scan(TABLE)
                .iter()
                .filter_map(|raw| serde_json::from_str(raw).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn create(
    db: &CoreProperty<Database>,
    ctx: &Context,
    req: CreateUserRequest,
) -> Result<(StatusCode, Json<User>), StatusCode> {
    let db = db.get(ctx.app()).ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    let user = User {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        email: req.email,
    };
    let raw = serde_json::to_string(&user).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    db.insert(TABLE, &user.id, raw);
    Ok((StatusCode::CREATED, Json(user)))
}
