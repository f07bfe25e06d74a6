/// Backend endpoint URLs, resolved against a base URL once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base_url: String,
    pub login: String,
    pub refresh: String,
    pub logout: String,
    pub chats: String,
    pub messages: String,
    pub models: String,
    pub agents: String,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let url = |path: &str| format!("{}{}", base_url, path);

        Self {
            login: url("/ai_chat/auth/login/"),
            refresh: url("/ai_chat/auth/refresh/"),
            logout: url("/ai_chat/auth/logout/"),
            chats: url("/ai_chat/chats/"),
            messages: url("/ai_chat/messages/"),
            models: url("/ai_chat/models/"),
            agents: url("/ai_chat/agents/"),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Turn a request target into a full URL. Absolute URLs pass through,
    /// collection names (`chats`, `messages`, ...) map to their endpoint and
    /// anything else is treated as a path under the base URL.
    pub fn resolve(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            return target.to_string();
        }
        if let Some(url) = self.named(target) {
            return url.to_string();
        }
        format!("{}/{}", self.base_url, target.trim_start_matches('/'))
    }

    pub fn named(&self, name: &str) -> Option<&str> {
        match name {
            "chats" => Some(&self.chats),
            "messages" => Some(&self.messages),
            "models" => Some(&self.models),
            "agents" => Some(&self.agents),
            _ => None,
        }
    }
}
