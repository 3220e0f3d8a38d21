//! The class model produced by the metadata parser.

use std::fmt;

/// Source language of a class or method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    /// Objective-C runtime metadata
    ObjC,
    /// Swift type metadata
    Swift,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::ObjC => f.write_str("objc"),
            Language::Swift => f.write_str("swift"),
        }
    }
}

/// Whether a method needs an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Instance method (`-`)
    Instance,
    /// Class (static) method (`+`)
    Class,
}

/// Whether a field is an instance variable or a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// The implicit class pointer every object starts with
    Isa,
    /// Instance variable with a layout offset
    Ivar,
    /// Declared property
    Property,
}

/// A name as stored in the binary plus an optional demangled form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    /// The name as stored
    pub raw: String,
    /// Demangled form, when one differs from `raw`
    pub demangled: Option<String>,
}

impl Name {
    /// Creates a name without a demangled form.
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            demangled: None,
        }
    }

    /// Attaches a demangled form if it differs from the raw name.
    pub fn with_demangled(mut self, demangled: Option<String>) -> Self {
        self.demangled = demangled.filter(|d| !d.is_empty() && *d != self.raw);
        self
    }

    /// Returns the demangled form if present, otherwise the raw name.
    pub fn display(&self) -> &str {
        self.demangled.as_deref().unwrap_or(&self.raw)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display())
    }
}

/// A method of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    /// Selector or member name, if it could be resolved
    pub name: Option<String>,
    /// Namespace the method was found in (class, category or protocol scope)
    pub class_name: Option<String>,
    /// Full type encoding
    pub signature: Option<String>,
    /// Return type, the leading type of the encoding
    pub return_type: Option<String>,
    /// Implementation address
    pub address: u64,
    /// Instance or class method
    pub kind: MethodKind,
    /// Source language
    pub language: Language,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sigil = match self.kind {
            MethodKind::Instance => '-',
            MethodKind::Class => '+',
        };
        write!(
            f,
            "{:#010x} {}{}",
            self.address,
            sigil,
            self.name.as_deref().unwrap_or("?")
        )?;
        if let Some(rtype) = &self.return_type {
            write!(f, " -> {}", rtype)?;
        }
        if let Some(scope) = &self.class_name {
            if scope.contains("::") {
                write!(f, " [{}]", scope)?;
            }
        }
        Ok(())
    }
}

/// An instance variable or property of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Field type, if known
    pub type_name: Option<Name>,
    /// Byte offset for ivars, list position for properties
    pub offset: u64,
    /// Size in bytes (0 if unknown)
    pub size: u32,
    /// Alignment in bytes (0 if unknown)
    pub alignment: u32,
    /// Address the field was described at
    pub address: u64,
    /// Ivar or property
    pub kind: FieldKind,
}

impl Field {
    /// Name of the implicit class-pointer field.
    pub const ISA_NAME: &'static str = "isa";

    /// Type of the implicit class-pointer field.
    pub const ISA_TYPE: &'static str = "struct objc_class *";

    /// Creates the implicit `isa` field every object starts with.
    pub fn isa(pointer_size: usize) -> Self {
        Self {
            name: Self::ISA_NAME.to_string(),
            type_name: Some(Name::new(Self::ISA_TYPE)),
            offset: 0,
            size: pointer_size as u32,
            alignment: pointer_size as u32,
            address: 0,
            kind: FieldKind::Isa,
        }
    }

    /// Returns true for the implicit `isa` field.
    #[inline]
    pub fn is_isa(&self) -> bool {
        self.kind == FieldKind::Isa
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FieldKind::Isa | FieldKind::Ivar => "ivar",
            FieldKind::Property => "property",
        };
        write!(f, "{:#06x} {} {}", self.offset, kind, self.name)?;
        if let Some(ty) = &self.type_name {
            write!(f, ": {}", ty)?;
        }
        Ok(())
    }
}

/// A class as reconstructed from the binary's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRecord {
    /// Class name (`Target(Category)` for categories)
    pub name: String,
    /// Address of the class (or category) record.
    ///
    /// For classes this is the `objc_class` record named in the class list,
    /// not the meta-class its `isa` points to.
    pub address: u64,
    /// Superclass names, in the order they were discovered
    pub superclasses: Vec<Name>,
    /// Instance and class methods
    pub methods: Vec<Method>,
    /// Instance variables and properties
    pub fields: Vec<Field>,
    /// Source language
    pub language: Language,
}

impl ClassRecord {
    /// Creates an empty, unnamed record.
    pub fn new(language: Language) -> Self {
        Self {
            name: String::new(),
            address: 0,
            superclasses: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            language,
        }
    }

    /// Returns true if no name has been resolved yet.
    #[inline]
    pub fn is_unnamed(&self) -> bool {
        self.name.is_empty()
    }

    /// Records a superclass unless the same name is already known.
    pub fn push_superclass(&mut self, name: Name) {
        if !self.superclasses.iter().any(|s| s.raw == name.raw) {
            self.superclasses.push(name);
        }
    }

    /// Returns the first superclass, if any.
    pub fn superclass(&self) -> Option<&Name> {
        self.superclasses.first()
    }

    /// Returns the methods of the given kind.
    pub fn methods_of(&self, kind: MethodKind) -> impl Iterator<Item = &Method> {
        self.methods.iter().filter(move |m| m.kind == kind)
    }

    /// Returns true if the implicit `isa` field is present.
    pub fn has_isa(&self) -> bool {
        self.fields.iter().any(Field::is_isa)
    }

    /// Puts the implicit `isa` field first, then ivars by offset, then
    /// properties in the order they were declared.
    ///
    /// The sort is stable, so ivars sharing an offset keep their order.
    pub fn sort_fields(&mut self) {
        self.fields.sort_by_key(|f| match f.kind {
            FieldKind::Isa => (0, 0),
            FieldKind::Ivar => (1, f.offset),
            FieldKind::Property => (2, 0),
        });
    }

    /// Prepends the implicit `isa` field if it is missing.
    pub fn ensure_isa(&mut self, pointer_size: usize) {
        if !self.has_isa() {
            self.fields.insert(0, Field::isa(pointer_size));
        }
    }

    /// Moves the members of `other` into this record.
    pub fn absorb(&mut self, other: ClassRecord) {
        for superclass in other.superclasses {
            self.push_superclass(superclass);
        }
        self.methods.extend(other.methods);
        self.fields.extend(other.fields);
        self.sort_fields();
    }
}

impl fmt::Display for ClassRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x} [{}] {}", self.address, self.language, self.name)?;
        if !self.superclasses.is_empty() {
            let supers: Vec<&str> = self.superclasses.iter().map(Name::display).collect();
            write!(f, " : {}", supers.join(", "))?;
        }
        for field in &self.fields {
            write!(f, "\n  {}", field)?;
        }
        for method in &self.methods {
            write!(f, "\n  {}", method)?;
        }
        Ok(())
    }
}
