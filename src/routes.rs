use crate::{
    auth::Actor,
    entity::Entity,
    error::AppError,
    input::{
        BookData, BookSearch, ExtendData, GenreData, LoginData, PageQuery, ProfileData,
        PublisherData, RegisterData, ReportQuery, ReserveData, ReviewData, StaffData,
        TransactionData,
    },
    loan::today,
    role::Capability,
};
use actix_web::{
    delete, get, post, put,
    web::{Data, Json, Path, Query, ServiceConfig},
    HttpResponse,
};
use serde::Serialize;

pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(home)
        .service(book_query)
        .service(book_create)
        .service(book_get)
        .service(book_update)
        .service(book_delete)
        .service(borrow)
        .service(reserve)
        .service(review_create)
        .service(borrow_return)
        .service(borrow_extend)
        .service(author_query)
        .service(author_get)
        .service(genre_create)
        .service(publisher_create)
        .service(staff_create)
        .service(user_create)
        .service(user_login)
        .service(user_logout)
        .service(profile_get)
        .service(profile_update)
        .service(dashboard)
        .service(report)
        .service(transaction_query)
        .service(transaction_create);
}

#[get("/")]
async fn home(entity: Data<Entity>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(entity.home().await?))
}

#[get("/books")]
async fn book_query(
    query: Query<BookSearch>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(entity.book_query(&query).await?))
}

#[post("/books")]
async fn book_create(
    actor: Actor,
    data: Json<BookData>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    actor.require(Capability::ManageCatalog)?;
    data.validate(today())?;
    Ok(HttpResponse::Created().json(entity.book_create(&data).await?))
}

#[get("/books/{id}")]
async fn book_get(id: Path<i64>, entity: Data<Entity>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(entity.book_get(*id).await?))
}

#[put("/books/{id}")]
async fn book_update(
    actor: Actor,
    id: Path<i64>,
    data: Json<BookData>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    actor.require(Capability::ManageCatalog)?;
    data.validate(today())?;
    Ok(HttpResponse::Ok().json(entity.book_update(*id, &data).await?))
}

#[delete("/books/{id}")]
async fn book_delete(
    actor: Actor,
    id: Path<i64>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    actor.require(Capability::ManageCatalog)?;
    entity.book_delete(*id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/books/{id}/borrow")]
async fn borrow(
    actor: Actor,
    id: Path<i64>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    let borrowing = entity.borrow(*id, actor.user.id).await?;
    Ok(HttpResponse::Created().json(borrowing))
}

#[post("/books/{id}/reserve")]
async fn reserve(
    actor: Actor,
    id: Path<i64>,
    data: Json<ReserveData>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    let reserved_for = data.validate(today())?;
    let reservation = entity.reserve(*id, actor.user.id, reserved_for).await?;
    Ok(HttpResponse::Created().json(reservation))
}

#[post("/books/{id}/reviews")]
async fn review_create(
    actor: Actor,
    id: Path<i64>,
    data: Json<ReviewData>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    let (rating, comment) = data.validate()?;
    let review = entity
        .review_create(*id, actor.user.id, rating, comment)
        .await?;
    Ok(HttpResponse::Created().json(review))
}

#[post("/borrows/{id}/return")]
async fn borrow_return(
    actor: Actor,
    id: Path<i64>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(entity.return_borrowing(*id, actor.user.id).await?))
}

#[post("/borrows/{id}/extend")]
async fn borrow_extend(
    actor: Actor,
    id: Path<i64>,
    data: Json<ExtendData>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    data.validate()?;
    let borrowing = entity
        .extend(*id, actor.user.id, data.extension_days)
        .await?;
    Ok(HttpResponse::Ok().json(borrowing))
}

#[get("/authors")]
async fn author_query(entity: Data<Entity>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(entity.author_query().await?))
}

#[get("/authors/{id}")]
async fn author_get(id: Path<i64>, entity: Data<Entity>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(entity.author_get(*id).await?))
}

#[post("/genres")]
async fn genre_create(
    actor: Actor,
    data: Json<GenreData>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    actor.require(Capability::ManageCatalog)?;
    data.validate()?;
    Ok(HttpResponse::Created().json(entity.genre_create(&data).await?))
}

#[post("/publishers")]
async fn publisher_create(
    actor: Actor,
    data: Json<PublisherData>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    actor.require(Capability::ManageCatalog)?;
    data.validate()?;
    Ok(HttpResponse::Created().json(entity.publisher_create(&data).await?))
}

#[post("/staff")]
async fn staff_create(
    actor: Actor,
    data: Json<StaffData>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    actor.require(Capability::ManageStaff)?;
    data.validate()?;
    Ok(HttpResponse::Created().json(entity.staff_create(&data).await?))
}

#[post("/register")]
async fn user_create(
    data: Json<RegisterData>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    data.validate()?;
    Ok(HttpResponse::Created().json(entity.user_create(&data).await?))
}

#[derive(Debug, Serialize)]
struct TokenData {
    token: String,
}

#[post("/login")]
async fn user_login(data: Json<LoginData>, entity: Data<Entity>) -> Result<HttpResponse, AppError> {
    let token = entity.user_login(&data.email, &data.password).await?;
    Ok(HttpResponse::Ok().json(TokenData { token }))
}

#[post("/logout")]
async fn user_logout(actor: Actor, entity: Data<Entity>) -> Result<HttpResponse, AppError> {
    entity.user_logout(&actor.token).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/profile")]
async fn profile_get(actor: Actor, entity: Data<Entity>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(entity.profile(actor.user).await?))
}

#[put("/profile")]
async fn profile_update(
    actor: Actor,
    data: Json<ProfileData>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    data.validate()?;
    Ok(HttpResponse::Ok().json(entity.profile_update(actor.user.id, &data).await?))
}

#[get("/dashboard")]
async fn dashboard(actor: Actor, entity: Data<Entity>) -> Result<HttpResponse, AppError> {
    actor.require(Capability::ViewReports)?;
    Ok(HttpResponse::Ok().json(entity.dashboard().await?))
}

#[get("/dashboard/reports")]
async fn report(
    actor: Actor,
    query: Query<ReportQuery>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    actor.require(Capability::ViewReports)?;
    query.validate()?;
    Ok(HttpResponse::Ok().json(entity.report(&query).await?))
}

#[get("/transactions")]
async fn transaction_query(
    actor: Actor,
    query: Query<PageQuery>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(entity.transaction_query(&actor.user, &query).await?))
}

#[post("/transactions")]
async fn transaction_create(
    actor: Actor,
    data: Json<TransactionData>,
    entity: Data<Entity>,
) -> Result<HttpResponse, AppError> {
    actor.require(Capability::ManageCirculation)?;
    data.validate()?;
    let transaction = entity.transaction_create(actor.user.id, &data).await?;
    Ok(HttpResponse::Created().json(transaction))
}

pub async fn fallback() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "error": "no such endpoint" }))
}

#[cfg(test)]
mod test {
    use super::{configure, fallback};
    use actix_web::{
        http::{header, StatusCode},
        test,
        web::route,
        App,
    };

    #[actix_web::test]
    async fn unknown_paths_fall_back() {
        let app = test::init_service(App::new().default_service(route().to(fallback))).await;
        let req = test::TestRequest::get().uri("/nowhere").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    // the extractor rejects before any database access
    #[actix_web::test]
    async fn protected_routes_need_a_token() {
        let app = test::init_service(App::new().configure(configure)).await;
        for (method, uri) in [
            (test::TestRequest::post(), "/books/1/borrow"),
            (test::TestRequest::post(), "/borrows/1/return"),
            (test::TestRequest::get(), "/profile"),
            (test::TestRequest::get(), "/dashboard"),
        ] {
            let req = method.uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[actix_web::test]
    async fn bogus_scheme_is_unauthorized() {
        let app = test::init_service(App::new().configure(configure)).await;
        let req = test::TestRequest::get()
            .uri("/transactions")
            .insert_header((header::AUTHORIZATION, "Basic dXNlcjpwYXNz"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
