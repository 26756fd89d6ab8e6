pub struct SetCookie {
    name: String,
    value: String,
    path: String,
    http_only: bool,
}

impl SetCookie {
    pub fn new(name: &str, value: &str) -> Self {
        SetCookie {
            name: name.to_string(),
            value: value.to_string(),
            path: "/".to_string(),
            http_only: true,
        }
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn to_header(&self) -> String {
        let mut header = format!("{}={}", self.name, self.value);
        header.push_str(&format!("; Path={}", self.path));
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header
    }
}
