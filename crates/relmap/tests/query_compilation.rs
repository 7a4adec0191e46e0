mod common;

use common::{ARTIST_COLUMNS, RecordingConnection, artist_row, catalog};
use relmap::prelude::*;
use relmap::{DialectKind, QueryErrorKind};
use std::sync::Arc;

fn session(kind: DialectKind) -> (RecordingConnection, Session<RecordingConnection>) {
    let conn = RecordingConnection::new(kind);
    let session = Session::open(conn.clone(), catalog(), SessionConfig::default()).unwrap();
    (conn, session)
}

#[test]
fn artists_with_a_named_partner() {
    let (conn, mut session) = session(DialectKind::Postgres);
    conn.returns_rows(vec![
        artist_row(7, 2, "Nico", Some(8)),
        artist_row(8, 1, "Lou", Some(7)),
    ]);

    let mut query = Query::new("Artist")
        .filter(QueryCondition::ne("Artist", "AnotherArtist.Alias", Value::Null))
        .unwrap();
    let found = session.query(&mut query).unwrap();

    assert_eq!(
        conn.statements(),
        vec![format!(
            "SELECT {} FROM Artist artist INNER JOIN Artist a1 ON a1.Id = artist.AnotherArtist WHERE (a1.Alias <> @p1)",
            ARTIST_COLUMNS
        )]
    );
    assert_eq!(conn.parameters(0), vec![Value::Null]);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id(), 7);
    assert_eq!(found[0].read().get("Alias"), &Value::from("Nico"));
    assert_eq!(
        found[0].read().reference("AnotherArtist").map(Reference::id),
        Some(8)
    );
}

#[test]
fn repeated_navigation_shares_one_join() {
    let (conn, mut session) = session(DialectKind::Postgres);
    let mut query = Query::new("Artist")
        .filter(
            Predicate::from(QueryCondition::eq("Artist", "AnotherArtist.Alias", "Nico"))
                .and(QueryCondition::ne("Artist", "AnotherArtist.Version", 0_i64)),
        )
        .unwrap()
        .order_by(SortExpression::desc("AnotherArtist.Alias"));
    session.query(&mut query).unwrap();

    let sql = &conn.statements()[0];
    assert_eq!(sql.matches("JOIN").count(), 1);
    assert!(sql.ends_with(
        "WHERE (a1.Alias = @p1 AND a1.Version <> @p2) ORDER BY a1.Alias DESC"
    ));
}

#[test]
fn global_filter_applies_until_cleared() {
    let filters = Arc::new(FilterCatalog::new());
    let (conn, session) = session(DialectKind::Postgres);
    let mut session = session.with_filters(Arc::clone(&filters));

    let mut query = Query::new("Artist")
        .filter(
            Predicate::from(QueryCondition::eq("Artist", "Alias", "Nico"))
                .or(QueryCondition::eq("Artist", "Alias", "Lou")),
        )
        .unwrap();
    session.query(&mut query).unwrap();

    filters
        .register(
            "Artist",
            QueryCondition::eq("Artist", "Deleted", false).into(),
        )
        .unwrap();
    session.query(&mut query).unwrap();

    filters.clear();
    session.query(&mut query).unwrap();

    let statements = conn.statements();
    assert!(statements[0].ends_with("WHERE (artist.Alias = @p1) OR (artist.Alias = @p2)"));
    assert!(statements[1].ends_with(
        "WHERE (artist.Deleted = @p1) AND ((artist.Alias = @p2) OR (artist.Alias = @p3))"
    ));
    assert_eq!(
        conn.parameters(1),
        vec![Value::Bool(false), Value::from("Nico"), Value::from("Lou")]
    );
    assert_eq!(statements[2], statements[0]);
}

#[test]
fn pagination_follows_the_dialect() {
    let cases = [
        (
            DialectKind::Postgres,
            format!("SELECT {} FROM Artist artist ORDER BY artist.Alias ASC LIMIT 10 OFFSET 20", ARTIST_COLUMNS),
        ),
        (
            DialectKind::Sqlite,
            format!("SELECT {} FROM Artist artist ORDER BY artist.Alias ASC LIMIT 10 OFFSET 20", ARTIST_COLUMNS),
        ),
        (
            DialectKind::Mysql,
            format!("SELECT {} FROM Artist artist ORDER BY artist.Alias ASC LIMIT 20, 10", ARTIST_COLUMNS),
        ),
        (
            DialectKind::SqlServer,
            format!(
                "SELECT {} FROM Artist artist ORDER BY artist.Alias ASC OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY",
                ARTIST_COLUMNS
            ),
        ),
    ];
    for (kind, expected) in cases {
        let (conn, mut session) = session(kind);
        let mut query = Query::new("Artist")
            .order_by(SortExpression::asc("Alias"))
            .max_results(10)
            .first_result(20);
        session.query(&mut query).unwrap();
        assert_eq!(conn.statements()[0], expected, "{:?}", kind);
    }
}

#[test]
fn sql_server_pagination_without_sort() {
    let (conn, mut session) = session(DialectKind::SqlServer);

    let mut top = Query::new("Artist").max_results(5);
    session.query(&mut top).unwrap();

    let mut page = Query::new("Artist").max_results(5).first_result(10);
    session.query(&mut page).unwrap();

    let statements = conn.statements();
    assert_eq!(
        statements[0],
        format!("SELECT TOP 5 {} FROM Artist artist", ARTIST_COLUMNS)
    );
    assert_eq!(
        statements[1],
        format!(
            "SELECT {} FROM Artist artist ORDER BY artist.Id OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY",
            ARTIST_COLUMNS
        )
    );
}

#[test]
fn string_methods_become_like() {
    let (conn, mut session) = session(DialectKind::Postgres);
    let mut query = Query::new("Artist")
        .filter(QueryCondition::new(
            "Artist",
            "Label.Name",
            Operator::StartsWith,
            "Fac",
        ))
        .unwrap();
    session.query(&mut query).unwrap();

    assert_eq!(
        conn.statements()[0],
        format!(
            "SELECT {} FROM Artist artist LEFT JOIN Label a1 ON a1.Id = artist.LabelId WHERE (a1.Name LIKE @p1)",
            ARTIST_COLUMNS
        )
    );
    assert_eq!(conn.parameters(0), vec![Value::from("Fac%")]);
}

#[test]
fn unresolvable_paths_are_rejected() {
    let (conn, mut session) = session(DialectKind::Postgres);
    let mut query = Query::new("Artist")
        .filter(QueryCondition::eq("Artist", "Label.Founded", 1970_i64))
        .unwrap();
    let err = session.query(&mut query).unwrap_err();
    assert_eq!(err.query_kind(), Some(QueryErrorKind::UnresolvedPath));
    assert!(conn.statements().is_empty());
}

#[test]
fn count_shares_the_where_clause() {
    let (conn, mut session) = session(DialectKind::Postgres);
    conn.returns_scalar(Value::BigInt(3));
    let query = Query::new("Artist")
        .filter(QueryCondition::eq("Artist", "Label.Name", "Factory"))
        .unwrap()
        .order_by(SortExpression::asc("Alias"))
        .max_results(1);

    assert_eq!(session.count(&query).unwrap(), 3);
    assert_eq!(
        conn.statements()[0],
        "SELECT COUNT(*) FROM Artist artist LEFT JOIN Label a1 ON a1.Id = artist.LabelId WHERE (a1.Name = @p1)"
    );
}
