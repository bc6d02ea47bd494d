//! Signed tracking URLs embedded in onboarding e-mails.

use std::collections::BTreeMap;

use url::Url;

use crate::{
    error::AppError,
    token::{LinkKind, LinkSigner},
};

pub const OPEN_PATH: &str = "/api/email/open";
pub const CLICK_PATH: &str = "/api/email/click";
pub const UNSUBSCRIBE_PATH: &str = "/api/email/unsubscribe";

/// Link factory for one message (`eid`) sent to one user (`uid`).
pub struct TrackingLinks<'a> {
    signer: &'a LinkSigner,
    base: &'a Url,
    uid: &'a str,
    eid: &'a str,
    ttl_secs: i64,
}

impl<'a> TrackingLinks<'a> {
    pub fn new(
        signer: &'a LinkSigner,
        base: &'a Url,
        uid: &'a str,
        eid: &'a str,
        ttl_secs: i64,
    ) -> Self {
        Self {
            signer,
            base,
            uid,
            eid,
            ttl_secs,
        }
    }

    pub fn open_pixel(&self) -> Result<String, AppError> {
        let token = self.sign(LinkKind::Open, None)?;
        Ok(self.url(
            OPEN_PATH,
            &[("t", token.as_str()), ("uid", self.uid), ("eid", self.eid)],
        ))
    }

    /// Redirect through the click tracker to `target`.
    pub fn click(&self, target: &str) -> Result<String, AppError> {
        let token = self.sign(LinkKind::Click, Some(target))?;
        Ok(self.url(
            CLICK_PATH,
            &[
                ("t", token.as_str()),
                ("uid", self.uid),
                ("eid", self.eid),
                ("url", target),
            ],
        ))
    }

    pub fn unsubscribe(&self) -> Result<String, AppError> {
        let token = self.sign(LinkKind::Unsubscribe, None)?;
        Ok(self.url(UNSUBSCRIBE_PATH, &[("t", token.as_str()), ("uid", self.uid)]))
    }

    fn sign(&self, kind: LinkKind, target: Option<&str>) -> Result<String, AppError> {
        let mut payload = BTreeMap::from([
            ("uid".to_string(), self.uid.to_string()),
            ("eid".to_string(), self.eid.to_string()),
            ("kind".to_string(), kind.as_str().to_string()),
        ]);
        if let Some(target) = target {
            payload.insert("target".to_string(), target.to_string());
        }
        Ok(self.signer.sign(&payload, self.ttl_secs)?)
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> String {
        let mut url = self.base.clone();
        url.set_path(path);
        url.query_pairs_mut().clear().extend_pairs(query);
        url.into()
    }
}
