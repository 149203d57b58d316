use rand::seq::IndexedRandom;

use crate::{
    config::ServerConfig,
    dto::{requests::LookupResponse, snapshot::Number},
};

/// Pick one of the clips configured for `number` at random.
pub fn lookup(config: &ServerConfig, number: Number) -> LookupResponse {
    let chosen = config
        .catalog
        .get(&number)
        .and_then(|clips| clips.choose(&mut rand::rng()));

    match chosen {
        Some(clip) => LookupResponse {
            number,
            found: true,
            audio_url: Some(clip.url.clone()),
            text: clip.text.clone(),
            message: None,
        },
        None => LookupResponse {
            number,
            found: false,
            audio_url: None,
            text: String::new(),
            message: Some(format!("no clip configured for number {number}")),
        },
    }
}

/// Label of the clip at `url` for `number`, empty when it is not in the catalog.
pub fn label(config: &ServerConfig, number: Number, url: &str) -> String {
    config
        .catalog
        .get(&number)
        .and_then(|clips| clips.iter().find(|clip| clip.url == url))
        .map(|clip| clip.text.clone())
        .unwrap_or_default()
}
