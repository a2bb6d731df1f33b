//! Versioned, transferable form of tracks and playlists.
//!
//! Serialized values are plain JSON objects tagged with `$type`. [`encode`]
//! turns any of them into base64 (standard alphabet) of the UTF-8 JSON text
//! and [`decode`] reverses it.

use base64::prelude::*;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    common::{
        PlayerError, PlayerResult,
        types::UserId,
    },
    protocol::tracks::{Playlist, PlaylistAuthor, PlaylistKind, QueryType, Requester, Track, TrackInfo},
};

/// Version stamped into every serialized value.
pub const ENCODER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializedType {
    Track,
    Playlist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedTrack {
    pub title: String,
    pub description: String,
    pub author: String,
    pub url: String,
    pub thumbnail: String,
    /// Milliseconds.
    pub duration: u64,
    pub views: u64,
    pub requested_by: Option<Requester>,
    pub source: String,
    pub live: bool,
    pub query_type: Option<QueryType>,
    pub extractor_id: Option<String>,
    pub metadata: Option<Value>,
    #[serde(rename = "$type")]
    pub kind: SerializedType,
    #[serde(rename = "$encoder_version")]
    pub encoder_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedPlaylist {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    #[serde(rename = "type")]
    pub playlist_type: PlaylistKind,
    pub source: String,
    pub author: Option<PlaylistAuthor>,
    pub url: String,
    pub tracks: Vec<SerializedTrack>,
    #[serde(rename = "$type")]
    pub kind: SerializedType,
    #[serde(rename = "$encoder_version")]
    pub encoder_version: String,
}

/// Resolves requester identities when tracks are restored.
pub trait UserDirectory: Send + Sync {
    fn resolve(&self, id: UserId) -> Option<Requester>;
}

impl<F> UserDirectory for F
where
    F: Fn(UserId) -> Option<Requester> + Send + Sync,
{
    fn resolve(&self, id: UserId) -> Option<Requester> {
        self(id)
    }
}

/// Directory that knows nobody; every requester decodes to `None`.
pub struct NoUsers;

impl UserDirectory for NoUsers {
    fn resolve(&self, _id: UserId) -> Option<Requester> {
        None
    }
}

impl Track {
    pub fn serialize(&self) -> SerializedTrack {
        SerializedTrack {
            title: self.title.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
            url: self.url.clone(),
            thumbnail: self.thumbnail.clone(),
            duration: self.duration_ms,
            views: self.views,
            requested_by: self.requested_by.clone(),
            source: self.source.clone(),
            live: self.live,
            query_type: self.query_type,
            extractor_id: self.extractor.clone(),
            metadata: self.metadata(),
            kind: SerializedType::Track,
            encoder_version: ENCODER_VERSION.to_string(),
        }
    }

    /// Rebuilds a track with a fresh identity.
    pub fn from_serialized(data: SerializedTrack, users: &dyn UserDirectory) -> PlayerResult<Self> {
        if data.kind != SerializedType::Track {
            return Err(PlayerError::DeserializationFailed(
                "expected a serialized track".into(),
            ));
        }

        Ok(Track::new(TrackInfo {
            title: data.title,
            description: data.description,
            author: data.author,
            url: data.url,
            thumbnail: data.thumbnail,
            duration_ms: data.duration,
            views: data.views,
            live: data.live,
            source: data.source,
            query_type: data.query_type,
            extractor: data.extractor_id,
            requested_by: data.requested_by.and_then(|r| users.resolve(r.id)),
            metadata: data.metadata,
        }))
    }
}

impl Playlist {
    pub fn serialize(&self) -> SerializedPlaylist {
        SerializedPlaylist {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            thumbnail: self.thumbnail.clone(),
            playlist_type: self.kind,
            source: self.source.clone(),
            author: self.author.clone(),
            url: self.url.clone(),
            tracks: self.tracks.iter().map(Track::serialize).collect(),
            kind: SerializedType::Playlist,
            encoder_version: ENCODER_VERSION.to_string(),
        }
    }

    pub fn from_serialized(
        data: SerializedPlaylist,
        users: &dyn UserDirectory,
    ) -> PlayerResult<Self> {
        if data.kind != SerializedType::Playlist {
            return Err(PlayerError::DeserializationFailed(
                "expected a serialized playlist".into(),
            ));
        }

        let tracks = data
            .tracks
            .into_iter()
            .map(|t| Track::from_serialized(t, users))
            .collect::<PlayerResult<Vec<_>>>()?;

        Ok(Playlist {
            id: data.id,
            title: data.title,
            description: data.description,
            thumbnail: data.thumbnail,
            kind: data.playlist_type,
            source: data.source,
            author: data.author,
            url: data.url,
            tracks,
        })
    }
}

/// Result of [`deserialize`], dispatched on `$type`.
#[derive(Debug, Clone)]
pub enum Deserialized {
    Track(Track),
    Playlist(Playlist),
}

/// Restores a track or playlist from its JSON form.
pub fn deserialize(value: Value, users: &dyn UserDirectory) -> PlayerResult<Deserialized> {
    let kind = value
        .get("$type")
        .cloned()
        .map(serde_json::from_value::<SerializedType>)
        .transpose()
        .map_err(|e| PlayerError::DeserializationFailed(e.to_string()))?;

    match kind {
        Some(SerializedType::Track) => {
            let data: SerializedTrack = from_value(value)?;
            Track::from_serialized(data, users).map(Deserialized::Track)
        }
        Some(SerializedType::Playlist) => {
            let data: SerializedPlaylist = from_value(value)?;
            Playlist::from_serialized(data, users).map(Deserialized::Playlist)
        }
        None => Err(PlayerError::DeserializationFailed(
            "missing $type tag".into(),
        )),
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> PlayerResult<T> {
    serde_json::from_value(value).map_err(|e| PlayerError::DeserializationFailed(e.to_string()))
}

/// base64 of the JSON text.
pub fn encode<T: Serialize>(data: &T) -> PlayerResult<String> {
    let json =
        serde_json::to_vec(data).map_err(|e| PlayerError::SerializationFailed(e.to_string()))?;
    Ok(BASE64_STANDARD.encode(json))
}

pub fn decode(data: &str) -> PlayerResult<Value> {
    let bytes = BASE64_STANDARD
        .decode(data.trim())
        .map_err(|e| PlayerError::DeserializationFailed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| PlayerError::DeserializationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Track {
        Track::new(TrackInfo {
            title: "Song".into(),
            author: "Artist".into(),
            url: "https://example.com/song".into(),
            duration_ms: 185_000,
            source: "arbitrary".into(),
            requested_by: Some(Requester {
                id: UserId(7),
                username: "alice".into(),
            }),
            ..Default::default()
        })
    }

    #[test]
    fn test_track_survives_encode_decode() {
        let track = sample();
        let encoded = encode(&track.serialize()).unwrap();
        let restored = match deserialize(decode(&encoded).unwrap(), &NoUsers).unwrap() {
            Deserialized::Track(t) => t,
            other => panic!("expected track, got {:?}", other),
        };

        assert_eq!(restored.title, track.title);
        assert_eq!(restored.author, track.author);
        assert_eq!(restored.url, track.url);
        assert_eq!(restored.duration_ms, track.duration_ms);
        assert_eq!(restored.source, track.source);
        assert_ne!(restored.id(), track.id());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let track = sample();
        track.set_metadata(Some(serde_json::json!({"b": 1, "a": [1, 2]})));
        assert_eq!(
            encode(&track.serialize()).unwrap(),
            encode(&track.serialize()).unwrap()
        );
    }

    #[test]
    fn test_serialized_track_shape() {
        let value = serde_json::to_value(sample().serialize()).unwrap();
        assert_eq!(value["$type"], "track");
        assert_eq!(value["$encoder_version"], ENCODER_VERSION);
        assert_eq!(value["duration"], 185_000);
        assert_eq!(value["requested_by"]["username"], "alice");
    }

    #[test]
    fn test_wrong_type_tag_is_rejected() {
        let mut value = serde_json::to_value(sample().serialize()).unwrap();
        value["$type"] = serde_json::json!("album");
        assert!(matches!(
            deserialize(value, &NoUsers),
            Err(PlayerError::DeserializationFailed(_))
        ));

        let mut data = sample().serialize();
        data.kind = SerializedType::Playlist;
        assert!(matches!(
            Track::from_serialized(data, &NoUsers),
            Err(PlayerError::DeserializationFailed(_))
        ));
    }

    #[test]
    fn test_requester_resolution() {
        let data = sample().serialize();

        let unresolved = Track::from_serialized(data.clone(), &NoUsers).unwrap();
        assert!(unresolved.requested_by.is_none());

        let users = |id: UserId| {
            (id == UserId(7)).then(|| Requester {
                id,
                username: "alice#current".into(),
            })
        };
        let resolved = Track::from_serialized(data, &users).unwrap();
        assert_eq!(resolved.requested_by.unwrap().username, "alice#current");
    }

    #[test]
    fn test_playlist_dispatch() {
        let playlist = Playlist {
            id: "pl".into(),
            title: "Mix".into(),
            description: String::new(),
            thumbnail: String::new(),
            kind: PlaylistKind::Album,
            source: "arbitrary".into(),
            author: None,
            url: "https://example.com/pl".into(),
            tracks: vec![sample(), sample()],
        };
        let value = serde_json::to_value(playlist.serialize()).unwrap();
        assert_eq!(value["type"], "album");

        match deserialize(value, &NoUsers).unwrap() {
            Deserialized::Playlist(p) => {
                assert_eq!(p.tracks.len(), 2);
                assert_eq!(p.duration_ms(), 370_000);
            }
            other => panic!("expected playlist, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode("not base64!!"),
            Err(PlayerError::DeserializationFailed(_))
        ));
    }
}
