//! Assembles class files for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;

use microbrew::bytecode::OPCode;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PUBLIC_STATIC: u16 = 0x0009;
pub const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

pub fn op(opcode: OPCode) -> u8 {
    u8::from(opcode)
}

/// Splits a constant pool index into the two operand bytes.
pub fn idx(index: u16) -> [u8; 2] {
    index.to_be_bytes()
}

struct MethodSpec {
    flags: u16,
    name: u16,
    descriptor: u16,
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
}

/// Minimal class file writer: one class, no fields, static methods only.
pub struct ClassBuilder {
    pool: Vec<Vec<u8>>,
    utf8: HashMap<String, u16>,
    this_class: u16,
    methods: Vec<MethodSpec>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        let mut builder = Self {
            pool: Vec::new(),
            utf8: HashMap::new(),
            this_class: 0,
            methods: Vec::new(),
        };
        builder.this_class = builder.class(name);
        builder
    }

    fn push(&mut self, entry: Vec<u8>) -> u16 {
        self.pool.push(entry);
        self.pool.len() as u16
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        if let Some(&index) = self.utf8.get(s) {
            return index;
        }
        let mut entry = vec![1];
        entry.extend_from_slice(&(s.len() as u16).to_be_bytes());
        entry.extend_from_slice(s.as_bytes());
        let index = self.push(entry);
        self.utf8.insert(s.to_owned(), index);
        index
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        let mut entry = vec![7];
        entry.extend_from_slice(&name.to_be_bytes());
        self.push(entry)
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        let mut entry = vec![3];
        entry.extend_from_slice(&value.to_be_bytes());
        self.push(entry)
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut entry = vec![12];
        entry.extend_from_slice(&name.to_be_bytes());
        entry.extend_from_slice(&descriptor.to_be_bytes());
        self.push(entry)
    }

    fn member_ref(&mut self, tag: u8, class: u16, name: &str, descriptor: &str) -> u16 {
        let name_and_type = self.name_and_type(name, descriptor);
        let mut entry = vec![tag];
        entry.extend_from_slice(&class.to_be_bytes());
        entry.extend_from_slice(&name_and_type.to_be_bytes());
        self.push(entry)
    }

    /// `Methodref` to a method of the class being built.
    pub fn method_ref(&mut self, name: &str, descriptor: &str) -> u16 {
        let class = self.this_class;
        self.member_ref(10, class, name, descriptor)
    }

    /// `Fieldref` to `System.out`.
    pub fn system_out(&mut self) -> u16 {
        let class = self.class("java/lang/System");
        self.member_ref(9, class, "out", "Ljava/io/PrintStream;")
    }

    /// `Methodref` to `PrintStream.println(int)`.
    pub fn println(&mut self) -> u16 {
        let class = self.class("java/io/PrintStream");
        self.member_ref(10, class, "println", "(I)V")
    }

    pub fn method(
        &mut self,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
    ) -> &mut Self {
        self.method_with_flags(ACC_PUBLIC_STATIC, name, descriptor, max_stack, max_locals, code)
    }

    pub fn method_with_flags(
        &mut self,
        flags: u16,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
    ) -> &mut Self {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.methods.push(MethodSpec {
            flags,
            name,
            descriptor,
            max_stack,
            max_locals,
            code,
        });
        self
    }

    pub fn build(&mut self) -> Vec<u8> {
        let code_name = self.utf8("Code");
        let object = self.class("java/lang/Object");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 52]);
        bytes.extend_from_slice(&(self.pool.len() as u16 + 1).to_be_bytes());
        for entry in &self.pool {
            bytes.extend_from_slice(entry);
        }
        bytes.extend_from_slice(&0x0021u16.to_be_bytes());
        bytes.extend_from_slice(&self.this_class.to_be_bytes());
        bytes.extend_from_slice(&object.to_be_bytes());
        // interfaces, fields
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            bytes.extend_from_slice(&method.flags.to_be_bytes());
            bytes.extend_from_slice(&method.name.to_be_bytes());
            bytes.extend_from_slice(&method.descriptor.to_be_bytes());
            bytes.extend_from_slice(&1u16.to_be_bytes());
            bytes.extend_from_slice(&code_name.to_be_bytes());
            let length = 12 + method.code.len() as u32;
            bytes.extend_from_slice(&length.to_be_bytes());
            bytes.extend_from_slice(&method.max_stack.to_be_bytes());
            bytes.extend_from_slice(&method.max_locals.to_be_bytes());
            bytes.extend_from_slice(&(method.code.len() as u32).to_be_bytes());
            bytes.extend_from_slice(&method.code);
            // exception table, attributes
            bytes.extend_from_slice(&[0, 0, 0, 0]);
        }
        // class attributes
        bytes.extend_from_slice(&[0, 0]);
        bytes
    }
}

/// `Sum`: `main` prints 2 + 3.
pub fn sum_class() -> Vec<u8> {
    let mut class = ClassBuilder::new("Sum");
    let out = class.system_out();
    let println = class.println();
    let mut code = vec![op(OPCode::GetStatic)];
    code.extend_from_slice(&idx(out));
    code.extend_from_slice(&[op(OPCode::Iconst2), op(OPCode::Iconst3), op(OPCode::IAdd)]);
    code.push(op(OPCode::InvokeVirtual));
    code.extend_from_slice(&idx(println));
    code.push(op(OPCode::Return));
    class.method("main", MAIN_DESCRIPTOR, 3, 1, code).build()
}

/// `Factorial`: recursive `fact(int)`, `main` prints `fact(n)`.
pub fn factorial_class(n: i8) -> Vec<u8> {
    let mut class = ClassBuilder::new("Factorial");
    let out = class.system_out();
    let println = class.println();
    let fact = class.method_ref("fact", "(I)I");

    let mut fact_code = vec![
        op(OPCode::ILoad0),
        op(OPCode::Iconst1),
        op(OPCode::IfICmpGt),
        0,
        5,
        op(OPCode::Iconst1),
        op(OPCode::IReturn),
        op(OPCode::ILoad0),
        op(OPCode::ILoad0),
        op(OPCode::Iconst1),
        op(OPCode::ISub),
        op(OPCode::InvokeStatic),
    ];
    fact_code.extend_from_slice(&idx(fact));
    fact_code.extend_from_slice(&[op(OPCode::IMul), op(OPCode::IReturn)]);

    let mut main_code = vec![op(OPCode::GetStatic)];
    main_code.extend_from_slice(&idx(out));
    main_code.extend_from_slice(&[op(OPCode::BiPush), n as u8, op(OPCode::InvokeStatic)]);
    main_code.extend_from_slice(&idx(fact));
    main_code.push(op(OPCode::InvokeVirtual));
    main_code.extend_from_slice(&idx(println));
    main_code.push(op(OPCode::Return));

    class
        .method("fact", "(I)I", 3, 1, fact_code)
        .method("main", MAIN_DESCRIPTOR, 2, 1, main_code)
        .build()
}
