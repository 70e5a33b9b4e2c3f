//! Abstract representation of a Java program.
use crate::jvm::{AttributeInfo, ClassFormatError, ConstantPool, JVMClassFile};
use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

type Result<T> = std::result::Result<T, ClassFormatError>;

/// `ACC_STATIC` access flag.
pub const ACC_STATIC: u16 = 0x0008;

/// Field types a descriptor can name.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BaseTypeKind {
    Int,
    Byte,
    Char,
    Short,
    Boolean,
    Long,
    Float,
    Double,
    Void,
    Reference,
    Array,
}

/// JVM value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    t: BaseTypeKind,
    sub_t: Option<Box<Type>>,
}

impl Type {
    pub const fn kind(&self) -> BaseTypeKind {
        self.t
    }

    /// Element type of an array type.
    pub fn element(&self) -> Option<&Type> {
        self.sub_t.as_deref()
    }

    /// Returns the number of local variable slots a value of this type
    /// occupies.
    pub const fn size(&self) -> usize {
        match self.t {
            BaseTypeKind::Long | BaseTypeKind::Double => 2,
            BaseTypeKind::Void => 0,
            _ => 1,
        }
    }
}

fn method_descriptor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\(((?:\[*(?:[BCDFIJSZ]|L[^;]+;))*)\)(V|\[*(?:[BCDFIJSZ]|L[^;]+;))$")
            .expect("method descriptor pattern is valid")
    })
}

fn field_type_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[*(?:[BCDFIJSZ]|L[^;]+;)").expect("field type pattern is valid")
    })
}

/// Parse a method descriptor such as `(I[I)V`, returns a tuple of
/// argument types and return type.
pub fn parse_method_types(descriptor: &str) -> Result<(Vec<Type>, Type)> {
    let caps = method_descriptor_regex()
        .captures(descriptor)
        .ok_or_else(|| ClassFormatError::BadDescriptor(descriptor.to_owned()))?;
    let arg_string = caps.get(1).map_or("", |m| m.as_str());
    let return_type_string = caps.get(2).map_or("", |m| m.as_str());

    let arg_types = field_type_regex()
        .find_iter(arg_string)
        .map(|m| decode_type(m.as_str()))
        .collect::<Result<Vec<_>>>()?;
    let return_type = decode_type(return_type_string)?;
    Ok((arg_types, return_type))
}

/// Returns the type named by a single field descriptor.
pub fn decode_type(type_str: &str) -> Result<Type> {
    let bad = || ClassFormatError::BadDescriptor(type_str.to_owned());
    let t = match type_str.chars().next().ok_or_else(bad)? {
        'I' => BaseTypeKind::Int,
        'B' => BaseTypeKind::Byte,
        'C' => BaseTypeKind::Char,
        'S' => BaseTypeKind::Short,
        'Z' => BaseTypeKind::Boolean,
        'J' => BaseTypeKind::Long,
        'F' => BaseTypeKind::Float,
        'D' => BaseTypeKind::Double,
        'V' => BaseTypeKind::Void,
        'L' if type_str.ends_with(';') => BaseTypeKind::Reference,
        '[' => {
            let element = decode_type(&type_str[1..])?;
            return Ok(Type {
                t: BaseTypeKind::Array,
                sub_t: Some(Box::new(element)),
            });
        }
        _ => return Err(bad()),
    };
    Ok(Type { t, sub_t: None })
}

/// Java class method representation for the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    name: String,
    descriptor: String,
    access_flags: u16,
    return_type: Type,
    arg_types: Vec<Type>,
    max_stack: u16,
    max_locals: u16,
    code: Option<Vec<u8>>,
}

impl Method {
    /// Builds a static method from its parts.
    pub fn new(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
    ) -> Result<Self> {
        let name = name.into();
        let descriptor = descriptor.into();
        let (arg_types, return_type) = parse_method_types(&descriptor)?;
        Ok(Self {
            name,
            descriptor,
            access_flags: ACC_STATIC,
            return_type,
            arg_types,
            max_stack,
            max_locals,
            code: Some(code),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub const fn access_flags(&self) -> u16 {
        self.access_flags
    }

    pub const fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn arg_types(&self) -> &[Type] {
        &self.arg_types
    }

    pub const fn return_type(&self) -> &Type {
        &self.return_type
    }

    pub const fn max_stack(&self) -> u16 {
        self.max_stack
    }

    pub const fn max_locals(&self) -> u16 {
        self.max_locals
    }

    /// Bytecode of the method, `None` for abstract and native methods.
    pub fn code(&self) -> Option<&[u8]> {
        self.code.as_deref()
    }

    /// Number of local slots filled by the arguments of a static call.
    pub fn parameter_slots(&self) -> usize {
        self.arg_types.iter().map(Type::size).sum()
    }
}

/// Representation of Java programs that we want to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    class_name: String,
    constant_pool: ConstantPool,
    methods: Vec<Method>,
    // (name, descriptor) -> position in `methods`.
    index: HashMap<(String, String), usize>,
}

impl Program {
    /// Build a new program from a parsed class file.
    pub fn new(class_file: &JVMClassFile) -> Result<Self> {
        let constants = class_file.constant_pool();
        let mut methods = Vec::with_capacity(class_file.methods().len());
        for method_info in class_file.methods() {
            let name = constants.utf8(method_info.name_index() as usize)?;
            let descriptor = constants.utf8(method_info.descriptor_index() as usize)?;
            let (arg_types, return_type) = parse_method_types(descriptor)?;

            let (max_stack, max_locals, code) = match method_info.attributes().get("Code") {
                Some(AttributeInfo::CodeAttribute {
                    max_stack,
                    max_locals,
                    code,
                    ..
                }) => (*max_stack, *max_locals, Some(code.clone())),
                _ => (0, 0, None),
            };

            methods.push(Method {
                name: name.to_owned(),
                descriptor: descriptor.to_owned(),
                access_flags: method_info.access_flags(),
                return_type,
                arg_types,
                max_stack,
                max_locals,
                code,
            });
        }

        let program = Self::from_parts(
            class_file.class_name()?,
            constants.clone(),
            methods,
        );
        debug!(
            class = %program.class_name,
            methods = program.methods.len(),
            "loaded class"
        );
        Ok(program)
    }

    /// Assemble a program from an already built constant pool and methods.
    pub fn from_parts(
        class_name: impl Into<String>,
        constant_pool: ConstantPool,
        methods: Vec<Method>,
    ) -> Self {
        let index = methods
            .iter()
            .enumerate()
            .map(|(i, m)| ((m.name.clone(), m.descriptor.clone()), i))
            .collect();
        Self {
            class_name: class_name.into(),
            constant_pool,
            methods,
            index,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub const fn constant_pool(&self) -> &ConstantPool {
        &self.constant_pool
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Find a method declared by this class by name and descriptor.
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.index
            .get(&(name.to_owned(), descriptor.to_owned()))
            .map(|&i| &self.methods[i])
    }

    /// Resolve the `Methodref` constant at `index` to a method of this
    /// class.
    pub fn method_from_ref(&self, index: u16) -> Result<&Method> {
        let (name, descriptor) = self.constant_pool.method_ref(index as usize)?;
        self.find_method(name, descriptor)
            .ok_or_else(|| ClassFormatError::UnresolvedMethod {
                name: name.to_owned(),
                descriptor: descriptor.to_owned(),
            })
    }

    /// Read the `Integer` constant at `index`.
    pub fn integer_constant(&self, index: u16) -> Result<i32> {
        self.constant_pool.integer(index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::CPInfo;
    use pretty_assertions::assert_eq;

    fn utf8(s: &str) -> CPInfo {
        CPInfo::ConstantUtf8 {
            bytes: s.to_owned(),
        }
    }

    #[test]
    fn parses_method_descriptors() {
        let (args, ret) = parse_method_types("(I[ILjava/lang/String;J)V").unwrap();
        let kinds: Vec<_> = args.iter().map(Type::kind).collect();
        assert_eq!(
            kinds,
            vec![
                BaseTypeKind::Int,
                BaseTypeKind::Array,
                BaseTypeKind::Reference,
                BaseTypeKind::Long
            ]
        );
        assert_eq!(args[1].element().map(Type::kind), Some(BaseTypeKind::Int));
        assert_eq!(ret.kind(), BaseTypeKind::Void);

        let (args, ret) = parse_method_types("()[[I").unwrap();
        assert!(args.is_empty());
        assert_eq!(ret.kind(), BaseTypeKind::Array);
        assert_eq!(
            ret.element().and_then(Type::element).map(Type::kind),
            Some(BaseTypeKind::Int)
        );
    }

    #[test]
    fn rejects_malformed_descriptors() {
        for descriptor in ["", "I", "(I", "(Q)V", "(Ljava/lang/String)V", "()"] {
            assert!(
                parse_method_types(descriptor).is_err(),
                "{descriptor:?} should be rejected"
            );
        }
    }

    #[test]
    fn parameter_slots_follow_descriptor() {
        let method = Method::new("f", "(II[I)I", 2, 3, vec![0x1a, 0xac]).unwrap();
        assert_eq!(method.parameter_slots(), 3);
        assert!(method.is_static());
        let main = Method::new("main", "([Ljava/lang/String;)V", 0, 1, vec![0xb1]).unwrap();
        assert_eq!(main.parameter_slots(), 1);
        let wide = Method::new("w", "(JI)V", 0, 3, vec![0xb1]).unwrap();
        assert_eq!(wide.parameter_slots(), 3);
    }

    #[test]
    fn resolves_method_refs_and_constants() {
        let pool = ConstantPool::new(vec![
            utf8("Demo"),                       // #1
            CPInfo::ConstantClass { name_index: 1 }, // #2
            utf8("twice"),                      // #3
            utf8("(I)I"),                       // #4
            CPInfo::ConstantNameAndType {
                name_index: 3,
                descriptor_index: 4,
            }, // #5
            CPInfo::ConstantMethodRef {
                class_index: 2,
                name_and_type_index: 5,
            }, // #6
            CPInfo::ConstantInteger { bytes: 100_000 }, // #7
        ]);
        let twice = Method::new("twice", "(I)I", 2, 1, vec![0x1a, 0x05, 0x68, 0xac]).unwrap();
        let program = Program::from_parts("Demo", pool, vec![twice.clone()]);

        assert_eq!(program.method_from_ref(6).unwrap(), &twice);
        assert_eq!(program.integer_constant(7).unwrap(), 100_000);
        assert!(program.find_method("twice", "(J)J").is_none());
        assert!(matches!(
            program.method_from_ref(5),
            Err(ClassFormatError::UnexpectedConstant { index: 5, .. })
        ));
        assert!(matches!(
            program.integer_constant(3),
            Err(ClassFormatError::UnexpectedConstant { index: 3, .. })
        ));
    }
}
