use nosql::driver::BackendKind;
use nosql::errors::NoSqlResult;
use nosql_int_test::contract_tests;
use nosql_int_test::test_util::{create_embedded_context, TestContext};

#[ctor::ctor]
fn init() {
    colog::init();
}

async fn fjall() -> NoSqlResult<Option<TestContext>> {
    create_embedded_context(BackendKind::Fjall).await.map(Some)
}

contract_tests!(fjall);
contract_tests!(fjall; closed_driver_rejects_calls);
