use super::{page_bounds, Entity};
use crate::{
    error::{is_foreign_key_violation, is_unique_violation, AppError},
    input::{normalize_website, BookData, BookSearch, FieldErrors, GenreData, PublisherData},
    loan::Copies,
    models::{
        Author, AuthorDetail, Book, BookChunk, BookDetail, BookSummary, Genre, Location,
        Publisher, ReviewView,
    },
};
use sqlx::{Postgres, Transaction as DbTransaction};
use tracing::info;

const SUMMARY_SELECT: &str = "
    SELECT
        b.id, b.title, b.isbn, b.publication_date, b.total_copies, b.available_copies,
        b.cover_image,
        COALESCE((
            SELECT array_agg(a.first_name || ' ' || a.last_name ORDER BY a.last_name, a.first_name)
            FROM book_authors ba JOIN authors a ON a.id = ba.author_id
            WHERE ba.book_id = b.id
        ), '{}') AS authors,
        COALESCE((
            SELECT array_agg(g.name ORDER BY g.name)
            FROM book_genres bg JOIN genres g ON g.id = bg.genre_id
            WHERE bg.book_id = b.id
        ), '{}') AS genres,
        (SELECT AVG(r.rating)::float8 FROM reviews r WHERE r.book_id = b.id) AS average_rating
    FROM books b";

// $1 title, $2 isbn, $3 author, $4 genre, $5 free text; all optional ILIKE patterns
const SEARCH_FILTER: &str = "
    WHERE ($1::text IS NULL OR b.title ILIKE $1)
      AND ($2::text IS NULL OR b.isbn ILIKE $2)
      AND ($3::text IS NULL OR EXISTS (
          SELECT 1 FROM book_authors ba JOIN authors a ON a.id = ba.author_id
          WHERE ba.book_id = b.id AND (a.first_name || ' ' || a.last_name) ILIKE $3))
      AND ($4::text IS NULL OR EXISTS (
          SELECT 1 FROM book_genres bg JOIN genres g ON g.id = bg.genre_id
          WHERE bg.book_id = b.id AND g.name ILIKE $4))
      AND ($5::text IS NULL
          OR b.title ILIKE $5 OR b.isbn ILIKE $5 OR b.description ILIKE $5
          OR EXISTS (
              SELECT 1 FROM book_authors ba JOIN authors a ON a.id = ba.author_id
              WHERE ba.book_id = b.id AND (a.first_name || ' ' || a.last_name) ILIKE $5)
          OR EXISTS (
              SELECT 1 FROM book_genres bg JOIN genres g ON g.id = bg.genre_id
              WHERE bg.book_id = b.id AND g.name ILIKE $5))";

const LATEST_BOOKS: i64 = 8;

/// Turns user text into a substring pattern, escaping LIKE wildcards.
fn like_pattern(text: Option<&str>) -> Option<String> {
    let text = text?.trim();
    if text.is_empty() {
        return None;
    }
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    Some(pattern)
}

fn book_conflict(err: sqlx::Error) -> AppError {
    if is_unique_violation(&err) {
        AppError::DuplicateIsbn
    } else if is_foreign_key_violation(&err) {
        FieldErrors::single("book", "Unknown publisher, author or genre").into()
    } else {
        AppError::Database(err)
    }
}

fn name_conflict(what: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |err| {
        if is_unique_violation(&err) {
            AppError::DuplicateName(what)
        } else {
            AppError::Database(err)
        }
    }
}

fn average(ratings: impl Iterator<Item = i16>) -> Option<f64> {
    let (sum, count) = ratings.fold((0i64, 0i64), |(sum, count), r| (sum + i64::from(r), count + 1));
    (count > 0).then(|| sum as f64 / count as f64)
}

async fn link_book(
    tx: &mut DbTransaction<'_, Postgres>,
    book_id: i64,
    data: &BookData,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM book_authors WHERE book_id = $1")
        .bind(book_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM book_genres WHERE book_id = $1")
        .bind(book_id)
        .execute(&mut *tx)
        .await?;

    for author_id in &data.author_ids {
        sqlx::query(
            "INSERT INTO book_authors (book_id, author_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(book_id)
        .bind(author_id)
        .execute(&mut *tx)
        .await
        .map_err(book_conflict)?;
    }
    for genre_id in &data.genre_ids {
        sqlx::query(
            "INSERT INTO book_genres (book_id, genre_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(book_id)
        .bind(genre_id)
        .execute(&mut *tx)
        .await
        .map_err(book_conflict)?;
    }
    Ok(())
}

impl Entity {
    pub async fn home(&self) -> Result<Vec<BookSummary>, AppError> {
        let books = sqlx::query_as(&format!("{SUMMARY_SELECT} ORDER BY b.id DESC LIMIT $1"))
            .bind(LATEST_BOOKS)
            .fetch_all(&self.pool)
            .await?;
        Ok(books)
    }

    pub async fn book_query(&self, search: &BookSearch) -> Result<BookChunk, AppError> {
        let filters = [
            like_pattern(search.title.as_deref()),
            like_pattern(search.isbn.as_deref()),
            like_pattern(search.author.as_deref()),
            like_pattern(search.genre.as_deref()),
            like_pattern(search.q.as_deref()),
        ];
        let (offset, limit) = page_bounds(search.page_size, search.page);

        let sql = format!("{SUMMARY_SELECT} {SEARCH_FILTER} ORDER BY b.title, b.id LIMIT $6 OFFSET $7");
        let mut query = sqlx::query_as::<_, BookSummary>(&sql);
        for filter in &filters {
            query = query.bind(filter.as_deref());
        }
        let items = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;

        let sql = format!("SELECT COUNT(*) FROM books b {SEARCH_FILTER}");
        let mut count = sqlx::query_scalar::<_, i64>(&sql);
        for filter in &filters {
            count = count.bind(filter.as_deref());
        }
        let total_count = count.fetch_one(&self.pool).await? as u32;

        Ok(BookChunk { items, total_count })
    }

    pub async fn book_get(&self, id: i64) -> Result<BookDetail, AppError> {
        let book: Book = sqlx::query_as("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("book"))?;

        let publisher: Option<String> = match book.publisher_id {
            Some(publisher_id) => {
                sqlx::query_scalar("SELECT name FROM publishers WHERE id = $1")
                    .bind(publisher_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => None,
        };

        let authors: Vec<Author> = sqlx::query_as(
            "SELECT a.* FROM authors a
            JOIN book_authors ba ON ba.author_id = a.id
            WHERE ba.book_id = $1
            ORDER BY a.last_name, a.first_name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let genres: Vec<Genre> = sqlx::query_as(
            "SELECT g.* FROM genres g
            JOIN book_genres bg ON bg.genre_id = g.id
            WHERE bg.book_id = $1
            ORDER BY g.name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let reviews: Vec<ReviewView> = sqlx::query_as(
            "SELECT r.id, u.first_name || ' ' || u.last_name AS reviewer, r.rating, r.comment,
                r.created_at
            FROM reviews r
            JOIN users u ON u.id = r.user_id
            WHERE r.book_id = $1
            ORDER BY r.created_at DESC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let average_rating = average(reviews.iter().map(|r| r.rating));

        Ok(BookDetail {
            book,
            publisher,
            authors,
            genres,
            reviews,
            average_rating,
        })
    }

    pub async fn book_create(&self, data: &BookData) -> Result<Book, AppError> {
        let copies = Copies::new(data.total_copies, data.available_copies())?;
        let mut tx = self.pool.begin().await?;

        let book: Book = sqlx::query_as(
            "INSERT INTO books (
                title, isbn, publication_date, pages, total_copies, available_copies,
                description, cover_image, publisher_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *",
        )
        .bind(data.title.trim())
        .bind(data.isbn.trim())
        .bind(data.publication_date)
        .bind(data.pages)
        .bind(copies.total())
        .bind(copies.available())
        .bind(&data.description)
        .bind(data.cover_image.as_deref())
        .bind(data.publisher_id)
        .fetch_one(&mut tx)
        .await
        .map_err(book_conflict)?;

        link_book(&mut tx, book.id, data).await?;
        tx.commit().await?;

        info!(book_id = book.id, isbn = %book.isbn, "book added");
        Ok(book)
    }

    pub async fn book_update(&self, id: i64, data: &BookData) -> Result<Book, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i64>("SELECT id FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut tx)
            .await?
            .ok_or(AppError::NotFound("book"))?;

        // stable while the book row is locked, checkout locks it first
        let on_loan: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrowings WHERE book_id = $1 AND NOT returned",
        )
        .bind(id)
        .fetch_one(&mut tx)
        .await?;
        let on_loan = i32::try_from(on_loan)
            .map_err(|_| AppError::Internal(format!("book {id} has {on_loan} open loans")))?;

        let copies = Copies::resize(data.total_copies, data.available_copies, on_loan)?;

        let book: Book = sqlx::query_as(
            "UPDATE books SET
                title = $2, isbn = $3, publication_date = $4, pages = $5, total_copies = $6,
                available_copies = $7, description = $8, cover_image = $9, publisher_id = $10
            WHERE id = $1
            RETURNING *",
        )
        .bind(id)
        .bind(data.title.trim())
        .bind(data.isbn.trim())
        .bind(data.publication_date)
        .bind(data.pages)
        .bind(copies.total())
        .bind(copies.available())
        .bind(&data.description)
        .bind(data.cover_image.as_deref())
        .bind(data.publisher_id)
        .fetch_one(&mut tx)
        .await
        .map_err(book_conflict)?;

        link_book(&mut tx, book.id, data).await?;
        tx.commit().await?;

        info!(book_id = book.id, on_loan = copies.on_loan(), "book updated");
        Ok(book)
    }

    pub async fn book_delete(&self, id: i64) -> Result<(), AppError> {
        let deleted = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(AppError::NotFound("book"));
        }
        info!(book_id = id, "book deleted");
        Ok(())
    }

    pub async fn author_query(&self) -> Result<Vec<Author>, AppError> {
        let authors = sqlx::query_as("SELECT * FROM authors ORDER BY last_name, first_name")
            .fetch_all(&self.pool)
            .await?;
        Ok(authors)
    }

    pub async fn author_get(&self, id: i64) -> Result<AuthorDetail, AppError> {
        let author: Author = sqlx::query_as("SELECT * FROM authors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("author"))?;

        let books = sqlx::query_as(&format!(
            "{SUMMARY_SELECT}
            WHERE EXISTS (
                SELECT 1 FROM book_authors ba WHERE ba.book_id = b.id AND ba.author_id = $1
            )
            ORDER BY b.publication_date DESC"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(AuthorDetail { author, books })
    }

    pub async fn genre_create(&self, data: &GenreData) -> Result<Genre, AppError> {
        let genre = sqlx::query_as(
            "INSERT INTO genres (name, description) VALUES ($1, $2) RETURNING *",
        )
        .bind(data.name.trim())
        .bind(data.description.trim())
        .fetch_one(&self.pool)
        .await
        .map_err(name_conflict("genre"))?;
        Ok(genre)
    }

    pub async fn publisher_create(&self, data: &PublisherData) -> Result<Publisher, AppError> {
        let Some(location) = &data.location else {
            return Err(FieldErrors::single("location", "Location is required").into());
        };
        let mut tx = self.pool.begin().await?;

        let location: Location = sqlx::query_as(
            "INSERT INTO locations (city, state, postal_code, country)
            VALUES ($1, $2, $3, $4)
            RETURNING *",
        )
        .bind(location.city.trim())
        .bind(location.state.trim())
        .bind(location.postal_code.trim())
        .bind(location.country.trim())
        .fetch_one(&mut tx)
        .await?;

        let publisher: Publisher = sqlx::query_as(
            "INSERT INTO publishers (name, address, phone, email, website, location_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *",
        )
        .bind(data.name.trim())
        .bind(data.address.trim())
        .bind(data.phone.trim())
        .bind(data.email.trim())
        .bind(normalize_website(&data.website))
        .bind(location.id)
        .fetch_one(&mut tx)
        .await
        .map_err(name_conflict("publisher"))?;

        tx.commit().await?;
        info!(publisher_id = publisher.id, city = %location.city, "publisher added");
        Ok(publisher)
    }

    #[cfg(test)]
    pub(super) async fn author_fixture(&self, last_name: &str) -> Result<i64, AppError> {
        let id = sqlx::query_scalar(
            "INSERT INTO authors (first_name, last_name, bio) VALUES ('Test', $1, 'Test Bio')
            RETURNING id",
        )
        .bind(last_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    #[cfg(test)]
    pub(super) async fn genre_fixture(&self, name: &str) -> Result<i64, AppError> {
        let data = GenreData {
            name: name.to_string(),
            description: "Test Description".to_string(),
        };
        Ok(self.genre_create(&data).await?.id)
    }

    #[cfg(test)]
    pub(super) async fn publisher_fixture(&self, name: &str) -> Result<i64, AppError> {
        let data = PublisherData {
            name: name.to_string(),
            address: "Test Address".to_string(),
            phone: "1234567890".to_string(),
            email: "publisher@test.com".to_string(),
            website: "www.test.com".to_string(),
            location: Some(crate::input::LocationData {
                city: "Test City".to_string(),
                state: "Test State".to_string(),
                postal_code: "12345".to_string(),
                country: "Test Country".to_string(),
            }),
        };
        Ok(self.publisher_create(&data).await?.id)
    }
}

#[cfg(test)]
mod test {
    use super::{average, like_pattern};
    use pretty_assertions::assert_eq;

    #[test]
    fn blank_filters_are_dropped() {
        assert_eq!(like_pattern(None), None);
        assert_eq!(like_pattern(Some("   ")), None);
    }

    #[test]
    fn patterns_match_substrings_literally() {
        assert_eq!(like_pattern(Some(" Dune ")), Some("%Dune%".to_string()));
        assert_eq!(
            like_pattern(Some("100%_off\\")),
            Some("%100\\%\\_off\\\\%".to_string())
        );
    }

    #[test]
    fn average_of_ratings() {
        assert_eq!(average([].into_iter()), None);
        assert_eq!(average([5, 4, 3].into_iter()), Some(4.0));
        assert_eq!(average([5, 4].into_iter()), Some(4.5));
    }
}
