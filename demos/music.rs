use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use batchload_rs::{align, BatchFunction, LoadError, Loader};
use futures::future;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Song {
    id: i32,
    name: String,
    author_id: i32,
}

#[derive(Debug, Clone)]
struct Playlist {
    id: i32,
    name: String,
    user_id: i32,
    song_ids: Vec<i32>,
}

#[derive(Debug, Clone)]
struct User {
    id: i32,
    name: String,
}

/// In-memory stand-in for the database; counts how many queries reach it.
#[derive(Default)]
struct Db {
    users: Vec<User>,
    songs: Vec<Song>,
    playlists: Vec<Playlist>,
    queries: AtomicUsize,
}

impl Db {
    fn seed() -> Self {
        let users = (1..=3).map(|id| User { id, name: format!("user {}", id) }).collect();
        let songs = (1..=9)
            .map(|id| Song { id, name: format!("song {}", id), author_id: (id % 3) + 1 })
            .collect();
        let playlists = (1..=4)
            .map(|id| Playlist {
                id,
                name: format!("playlist {}", id),
                user_id: (id % 2) + 1,
                song_ids: vec![id, id + 2, id + 4],
            })
            .collect();
        Self { users, songs, playlists, ..Default::default() }
    }

    /// `SELECT * FROM <table> WHERE <column> IN (<keys>)`
    fn select<T: Clone>(&self, rows: &[T], keys: &[i32], column: impl Fn(&T) -> i32) -> Vec<T> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        rows.iter().filter(|row| keys.contains(&column(row))).cloned().collect()
    }
}

type DbError = String;

struct SongById;

#[async_trait]
impl BatchFunction<i32, Option<Song>> for SongById {
    type Context = Arc<Db>;
    type Error = DbError;

    async fn load(
        keys: &[i32],
        db: &Arc<Db>,
    ) -> Result<Vec<Result<Option<Song>, DbError>>, DbError> {
        let songs = db.select(&db.songs, keys, |song| song.id);
        Ok(align::by_key(keys, songs, |song| song.id))
    }
}

struct SongsByAuthorId;

#[async_trait]
impl BatchFunction<i32, Vec<Song>> for SongsByAuthorId {
    type Context = Arc<Db>;
    type Error = DbError;

    async fn load(keys: &[i32], db: &Arc<Db>) -> Result<Vec<Result<Vec<Song>, DbError>>, DbError> {
        let songs = db.select(&db.songs, keys, |song| song.author_id);
        Ok(align::grouped_by_key(keys, songs, |song| song.author_id))
    }
}

struct PlaylistsByUserId;

#[async_trait]
impl BatchFunction<i32, Vec<Playlist>> for PlaylistsByUserId {
    type Context = Arc<Db>;
    type Error = DbError;

    async fn load(
        keys: &[i32],
        db: &Arc<Db>,
    ) -> Result<Vec<Result<Vec<Playlist>, DbError>>, DbError> {
        let playlists = db.select(&db.playlists, keys, |playlist| playlist.user_id);
        Ok(align::grouped_by_key(keys, playlists, |playlist| playlist.user_id))
    }
}

/// Loaders scoped to one inbound request; dropped with it.
struct RequestLoaders {
    song_by_id: Loader<i32, Option<Song>, DbError>,
    songs_by_author_id: Loader<i32, Vec<Song>, DbError>,
    playlists_by_user_id: Loader<i32, Vec<Playlist>, DbError>,
}

impl RequestLoaders {
    fn new(db: &Arc<Db>) -> Self {
        Self {
            song_by_id: Loader::new(SongById, db.clone()),
            songs_by_author_id: Loader::new(SongsByAuthorId, db.clone()),
            playlists_by_user_id: Loader::new(PlaylistsByUserId, db.clone()),
        }
    }
}

/// `{ users { name songs { name } playlists { name songs { name } } } }`
async fn resolve_user(loaders: &RequestLoaders, user: &User) -> Result<String, LoadError<DbError>> {
    let (songs, playlists) = future::join(
        loaders.songs_by_author_id.load(user.id),
        loaders.playlists_by_user_id.load(user.id),
    )
    .await;
    let songs = songs?.into_iter().map(|song| song.name).collect::<Vec<_>>();

    let mut lines = vec![format!("{} wrote {:?}", user.name, songs)];
    let playlists = playlists?;
    let playlist_songs = future::join_all(playlists.iter().map(|playlist| {
        future::join_all(loaders.song_by_id.load_many(playlist.song_ids.iter().copied()))
    }))
    .await;
    for (playlist, songs) in playlists.iter().zip(playlist_songs) {
        let names = songs
            .into_iter()
            .filter_map(|song| song.ok().flatten().map(|song| song.name))
            .collect::<Vec<_>>();
        lines.push(format!("  {} (#{}): {:?}", playlist.name, playlist.id, names));
    }
    Ok(lines.join("\n"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let db = Arc::new(Db::seed());
    let loaders = RequestLoaders::new(&db);

    let users = db.users.clone();
    let resolved = future::join_all(users.iter().map(|user| resolve_user(&loaders, user))).await;
    for user in resolved {
        match user {
            Ok(text) => println!("{}", text),
            Err(error) => println!("field error: {}", error),
        }
    }

    // One query per loader instead of one per user and playlist.
    tracing::info!(queries = db.queries.load(Ordering::SeqCst), users = users.len());
    assert_eq!(db.queries.load(Ordering::SeqCst), 3);
}
