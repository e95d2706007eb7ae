use nosql::errors::NoSqlResult;
use nosql_int_test::contract_tests;
use nosql_int_test::test_util::{create_memory_context, TestContext};

#[ctor::ctor]
fn init() {
    colog::init();
}

async fn memory() -> NoSqlResult<Option<TestContext>> {
    create_memory_context().map(Some)
}

contract_tests!(memory);
contract_tests!(memory; closed_driver_rejects_calls);
