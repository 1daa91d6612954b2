/// Splits a JVM method descriptor such as `(Ljava/io/InputStream;I)V` into
/// dotted parameter and return type names.
pub struct SignatureParser<'a> {
    signature: &'a str,
}

impl<'a> SignatureParser<'a> {
    pub fn new(signature: &'a str) -> Self {
        Self { signature }
    }

    pub fn parameter_types(&self) -> Vec<String> {
        let bytes = self.signature.as_bytes();
        let mut types = Vec::new();
        if bytes.first() != Some(&b'(') {
            return types;
        }
        let mut pos = 1;
        while pos < bytes.len() && bytes[pos] != b')' {
            match parse_type(bytes, &mut pos) {
                Some(ty) => types.push(ty),
                None => break,
            }
        }
        types
    }

    pub fn num_parameters(&self) -> usize {
        self.parameter_types().len()
    }

    /// `None` for `void` or a malformed descriptor.
    pub fn return_type(&self) -> Option<String> {
        let bytes = self.signature.as_bytes();
        let close = self.signature.find(')')?;
        let mut pos = close + 1;
        if bytes.get(pos) == Some(&b'V') {
            return None;
        }
        parse_type(bytes, &mut pos)
    }

    pub fn mentions(&self, class: &str) -> bool {
        let internal = format!("L{};", class.replace('.', "/"));
        self.signature.contains(&internal)
    }
}

fn parse_type(bytes: &[u8], pos: &mut usize) -> Option<String> {
    let tag = *bytes.get(*pos)?;
    *pos += 1;
    let ty = match tag {
        b'B' => "byte".to_string(),
        b'C' => "char".to_string(),
        b'D' => "double".to_string(),
        b'F' => "float".to_string(),
        b'I' => "int".to_string(),
        b'J' => "long".to_string(),
        b'S' => "short".to_string(),
        b'Z' => "boolean".to_string(),
        b'V' => "void".to_string(),
        b'[' => format!("{}[]", parse_type(bytes, pos)?),
        b'L' => {
            let start = *pos;
            while *bytes.get(*pos)? != b';' {
                *pos += 1;
            }
            let name = std::str::from_utf8(&bytes[start..*pos]).ok()?.replace('/', ".");
            *pos += 1;
            name
        }
        _ => return None,
    };
    Some(ty)
}

/// Primitive and array types never carry obligations.
pub fn is_reference_class(ty: &str) -> bool {
    !ty.ends_with("[]")
        && !matches!(
            ty,
            "byte" | "char" | "double" | "float" | "int" | "long" | "short" | "boolean" | "void"
        )
}

/// Lower-cased words of a camel-case identifier: `closeQuietly` -> `["close", "quietly"]`.
pub fn split_camel_case(ident: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in ident.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if ch.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reference_and_primitive_parameters() {
        let parser = SignatureParser::new("(Ljava/io/InputStream;I[Ljava/lang/String;)Ljava/io/Reader;");
        assert_eq!(
            parser.parameter_types(),
            vec!["java.io.InputStream", "int", "java.lang.String[]"]
        );
        assert_eq!(parser.return_type().as_deref(), Some("java.io.Reader"));
        assert!(parser.mentions("java.io.InputStream"));
    }

    #[test]
    fn void_and_malformed_descriptors() {
        assert_eq!(SignatureParser::new("()V").return_type(), None);
        assert_eq!(SignatureParser::new("()V").num_parameters(), 0);
        assert!(SignatureParser::new("garbage").parameter_types().is_empty());
    }

    #[test]
    fn camel_case_words() {
        assert_eq!(split_camel_case("closeQuietly"), vec!["close", "quietly"]);
        assert_eq!(split_camel_case("disclose"), vec!["disclose"]);
        assert!(split_camel_case("safeClose").contains(&"close".to_string()));
    }
}
