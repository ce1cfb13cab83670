use crate::compose::OutfitRequest;
use crate::fetch::{FetchError, ImageFetcher};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileReference {
    pub region: String,
    pub uid: String,
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile payload has no {0} section")]
    MissingSection(&'static str),
    #[error("profile payload is missing {0}")]
    MissingField(&'static str),
    #[error("invalid profile api url")]
    InvalidUrl,
    #[error(transparent)]
    Upstream(#[from] FetchError),
}

/// A logical field and the payload paths it may live under, in priority order.
struct FieldSpec {
    name: &'static str,
    paths: &'static [&'static [&'static str]],
}

const PROFILE_SECTION: &str = "profileInfo";

const EQUIPPED_SKILLS: FieldSpec = FieldSpec {
    name: "equipedSkills",
    paths: &[&["profileInfo", "equipedSkills"]],
};

const AVATAR_ID: FieldSpec = FieldSpec {
    name: "avatarId",
    paths: &[&["profileInfo", "avatarId"]],
};

// profileInfo is authoritative; basicInfo is the older payload shape.
const WEAPON_SKIN: FieldSpec = FieldSpec {
    name: "weaponSkinShows",
    paths: &[
        &["profileInfo", "weaponSkinShows"],
        &["basicInfo", "weaponSkinShows"],
    ],
};

const PET_SKIN: FieldSpec = FieldSpec {
    name: "petSkinId",
    paths: &[&["petInfo", "skinId"]],
};

#[derive(Clone)]
pub struct ProfileClient {
    fetcher: ImageFetcher,
    endpoint: String,
}

impl ProfileClient {
    pub fn new(fetcher: ImageFetcher, endpoint: String) -> Self {
        Self { fetcher, endpoint }
    }

    pub async fn fetch(&self, reference: &ProfileReference) -> Result<Value, ProfileError> {
        let url = self.profile_url(reference)?;
        debug!(uid = %reference.uid, region = %reference.region, "fetching profile");
        Ok(self.fetcher.fetch_json(url.as_str()).await?)
    }

    fn profile_url(&self, reference: &ProfileReference) -> Result<Url, ProfileError> {
        let mut url = Url::parse(&self.endpoint).map_err(|_| ProfileError::InvalidUrl)?;
        url.query_pairs_mut()
            .append_pair("uid", &reference.uid)
            .append_pair("region", &reference.region);
        Ok(url)
    }
}

/// Maps a profile payload into compositor inputs.
pub fn extract(payload: &Value) -> Result<OutfitRequest, ProfileError> {
    if value_at(payload, &[PROFILE_SECTION]).is_none() {
        return Err(ProfileError::MissingSection(PROFILE_SECTION));
    }
    let skill_ids = EQUIPPED_SKILLS
        .paths
        .iter()
        .find_map(|path| value_at(payload, path).and_then(Value::as_array))
        .filter(|skills| !skills.is_empty())
        .ok_or(ProfileError::MissingField(EQUIPPED_SKILLS.name))?
        .iter()
        .map(item_id_from_scalar)
        .collect::<Vec<_>>();
    let avatar_id = first_id(payload, &AVATAR_ID).ok_or(ProfileError::MissingField(AVATAR_ID.name))?;
    let weapon_skin_id = first_id(payload, &WEAPON_SKIN);
    let pet_skin_id = first_id(payload, &PET_SKIN);
    debug!(
        skills = skill_ids.len(),
        avatar_id,
        weapon_skin_id = ?weapon_skin_id,
        pet_skin_id = ?pet_skin_id,
        "profile fields extracted"
    );
    Ok(OutfitRequest {
        skill_ids,
        avatar_id: Some(avatar_id),
        weapon_skin_id,
        pet_skin_id,
    })
}

/// Accepts a bare id, a numeric string, or a list whose first element is one
/// of those. Anything else, including an empty list, yields `None`.
pub fn normalize_one_or_many(value: &Value) -> Option<u64> {
    match value {
        Value::Array(items) => items.first().and_then(item_id_from_scalar),
        other => item_id_from_scalar(other),
    }
}

fn item_id_from_scalar(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

// Zero ids mean "nothing equipped" for the single-item slots.
fn first_id(payload: &Value, spec: &FieldSpec) -> Option<u64> {
    spec.paths
        .iter()
        .filter_map(|path| value_at(payload, path))
        .find_map(normalize_one_or_many)
        .filter(|id| *id != 0)
}

fn value_at<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path {
        current = current.get(*segment)?;
    }
    if current.is_null() { None } else { Some(current) }
}
